//! CASCADE State Machine
//!
//! One epistemic transaction runs PREFLIGHT → CHECK* → ACT → POSTFLIGHT.
//! This module defines the phase vocabulary and the pure transition rules;
//! [`engine`] persists transitions through the store.

pub mod branch;
pub mod engine;

pub use branch::{BranchQuality, BranchSample, EvidenceWeighted, merge_score, select_best};
pub use engine::{CascadeEngine, ReflexSigner, SubmissionOutcome};

use serde::{Deserialize, Serialize};

use crate::types::{EmpiricaError, Result};

// =============================================================================
// Phases & Decisions
// =============================================================================

/// Phase of a recorded reflex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Preflight,
    Check,
    Act,
    Postflight,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "PREFLIGHT",
            Self::Check => "CHECK",
            Self::Act => "ACT",
            Self::Postflight => "POSTFLIGHT",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "PREFLIGHT" => Some(Self::Preflight),
            "CHECK" => Some(Self::Check),
            "ACT" => Some(Self::Act),
            "POSTFLIGHT" => Some(Self::Postflight),
            _ => None,
        }
    }

    /// The submit operation that records this phase.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Preflight => "reflex.submit_preflight",
            Self::Check => "reflex.submit_check",
            Self::Act => "reflex.submit_act",
            Self::Postflight => "reflex.submit_postflight",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared decision on a CHECK submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckDecision {
    Proceed,
    ProceedWithCaution,
    Investigate,
}

impl CheckDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::ProceedWithCaution => "proceed_with_caution",
            Self::Investigate => "investigate",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "proceed" => Some(Self::Proceed),
            "proceed_with_caution" => Some(Self::ProceedWithCaution),
            "investigate" => Some(Self::Investigate),
            _ => None,
        }
    }

    /// Whether this decision unlocks the ACT phase.
    pub fn permits_act(&self) -> bool {
        matches!(self, Self::Proceed | Self::ProceedWithCaution)
    }
}

// =============================================================================
// Transaction State
// =============================================================================

/// Observable state of one epistemic transaction, reconstructed from its
/// recorded reflexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    New,
    PreflightSubmitted,
    /// At least one CHECK recorded; the payload is the latest round
    CheckSubmitted,
    ActSubmitted,
    Closed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PreflightSubmitted => "PREFLIGHT_SUBMITTED",
            Self::CheckSubmitted => "CHECK_SUBMITTED",
            Self::ActSubmitted => "ACT_SUBMITTED",
            Self::Closed => "CLOSED",
        }
    }

    /// Operations that are legal from this state.
    pub fn expected_operations(&self) -> Vec<String> {
        let ops: &[&str] = match self {
            Self::New => &["reflex.submit_preflight"],
            Self::PreflightSubmitted => &["reflex.submit_check"],
            Self::CheckSubmitted => &["reflex.submit_check", "reflex.submit_act"],
            Self::ActSubmitted => &["reflex.submit_postflight"],
            Self::Closed => &["cascade.create"],
        };
        ops.iter().map(|s| s.to_string()).collect()
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a transaction used for transition checks.
#[derive(Debug, Clone, Default)]
pub struct TransactionProgress {
    pub preflight: bool,
    /// Highest recorded CHECK round (0 when none)
    pub check_rounds: u32,
    /// Latest CHECK decision, when any CHECK exists
    pub last_decision: Option<CheckDecision>,
    pub act: bool,
    pub postflight: bool,
}

impl TransactionProgress {
    pub fn state(&self) -> TransactionState {
        if self.postflight {
            TransactionState::Closed
        } else if self.act {
            TransactionState::ActSubmitted
        } else if self.check_rounds > 0 {
            TransactionState::CheckSubmitted
        } else if self.preflight {
            TransactionState::PreflightSubmitted
        } else {
            TransactionState::New
        }
    }

    /// Validate that submitting `phase` is legal from the current state.
    ///
    /// Returns the round number the new reflex must carry. Illegal
    /// transitions never reach the store.
    pub fn admit(&self, phase: Phase) -> Result<u32> {
        let state = self.state();
        let illegal = |expected_from: TransactionState| EmpiricaError::IllegalTransition {
            current: state.as_str().to_string(),
            attempted: phase.operation().to_string(),
            expected: expected_from.expected_operations(),
        };

        match phase {
            Phase::Preflight => {
                if state == TransactionState::New {
                    Ok(1)
                } else {
                    Err(illegal(state))
                }
            }
            Phase::Check => match state {
                TransactionState::PreflightSubmitted | TransactionState::CheckSubmitted => {
                    Ok(self.check_rounds + 1)
                }
                _ => Err(illegal(state)),
            },
            Phase::Act => {
                if state == TransactionState::CheckSubmitted
                    && self.last_decision.is_some_and(|d| d.permits_act())
                {
                    Ok(1)
                } else {
                    Err(illegal(state))
                }
            }
            Phase::Postflight => match state {
                // POSTFLIGHT is unconditional once ACT arrived; it is also
                // accepted straight after a proceed-decision CHECK so short
                // transactions can close without a recorded ACT.
                TransactionState::ActSubmitted => Ok(1),
                TransactionState::CheckSubmitted
                    if self.last_decision.is_some_and(|d| d.permits_act()) =>
                {
                    Ok(1)
                }
                _ => Err(illegal(state)),
            },
        }
    }
}
