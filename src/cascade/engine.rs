//! Persistence-aware CASCADE engine.
//!
//! Validates each submission against the transaction state machine,
//! evaluates gates with calibration offsets, records the reflex, keeps the
//! cascade row's phase bits in step, and computes drift and learning
//! deltas. Illegal transitions never produce reflexes.

use serde::{Deserialize, Serialize};

use super::{CheckDecision, Phase, TransactionProgress};
use crate::config::Config;
use crate::drift::{self, DriftReport, DriftSeverity};
use crate::store::{BreadcrumbKind, BreadcrumbLinks, CalibrationTrack, Database, NewReflex, Reflex};
use crate::types::{CascadeId, EmpiricaError, Result, SessionId, TransactionId};
use crate::vectors::{
    Assessment, EvidenceRecord, GateResult, RecommendedAction, VectorDelta, engagement_gate,
    readiness_gate,
};

/// Everything a submission returns to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub reflex_id: i64,
    pub transaction_id: TransactionId,
    pub phase: Phase,
    pub round: u32,
    /// Derived composite confidence of the submitted vectors
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_result: Option<GateResult>,
    pub recommended_action: RecommendedAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftReport>,
    pub safe_to_proceed: bool,
    /// Present on POSTFLIGHT: per-vector delta from the transaction's PREFLIGHT
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_delta: Option<VectorDelta>,
    #[serde(skip)]
    pub reflex: Option<Reflex>,
}

/// Produces the signature block for a reflex once its timestamp is fixed.
///
/// Implemented over the keystore at the API boundary; the engine itself
/// never touches private keys.
pub trait ReflexSigner: Sync {
    fn sign_reflex(
        &self,
        session_id: &SessionId,
        phase: Phase,
        round: u32,
        timestamp: &str,
        vectors: &crate::vectors::VectorMap,
        cascade_trace_hash: Option<&str>,
    ) -> Result<serde_json::Value>;
}

/// The engine borrows the store and deployment config.
pub struct CascadeEngine<'a> {
    db: &'a Database,
    config: &'a Config,
}

impl<'a> CascadeEngine<'a> {
    pub fn new(db: &'a Database, config: &'a Config) -> Self {
        Self { db, config }
    }

    /// Insert through the signer hook so the signature covers the exact
    /// stored timestamp and the checkpoint-chain position at submit time.
    fn insert(
        &self,
        new: NewReflex,
        signer: Option<&dyn ReflexSigner>,
    ) -> Result<Reflex> {
        let reflex = match signer {
            Some(signer) => {
                let trace_hash = self
                    .db
                    .latest_checkpoint(&new.session_id)?
                    .map(|c| c.content_hash);
                let session_id = new.session_id.clone();
                let phase = new.phase;
                let round = new.round;
                let vectors = new.vectors;
                let sign = move |timestamp: &str| {
                    signer.sign_reflex(
                        &session_id,
                        phase,
                        round,
                        timestamp,
                        &vectors,
                        trace_hash.as_deref(),
                    )
                };
                self.db.insert_reflex_signed(new, Some(&sign))?
            }
            None => self.db.insert_reflex(new)?,
        };
        self.after_insert(&reflex)?;
        Ok(reflex)
    }

    /// PREFLIGHT: opens the transaction. The engagement gate is evaluated
    /// here; failing it records the reflex and recommends INVESTIGATE
    /// regardless of other scores.
    pub fn submit_preflight(
        &self,
        session_id: &SessionId,
        cascade_id: Option<&CascadeId>,
        transaction_id: &TransactionId,
        assessment: &Assessment,
        signer: Option<&dyn ReflexSigner>,
    ) -> Result<SubmissionOutcome> {
        let session = self.db.get_session(session_id)?;
        let progress = self.db.transaction_progress(transaction_id)?;
        let round = progress.admit(Phase::Preflight)?;

        let gate = engagement_gate(&assessment.vectors, self.config.gates.engagement_threshold);
        let recommended = if gate.passed {
            self.readiness_recommendation(&session.ai_id, assessment)?
        } else {
            RecommendedAction::Investigate
        };

        let reflex = self.insert(
            NewReflex {
                session_id: session_id.clone(),
                cascade_id: cascade_id.cloned(),
                phase: Phase::Preflight,
                round,
                vectors: assessment.vectors,
                reasoning: assessment.reasoning.clone(),
                evidence: assessment.evidence.clone(),
                decision: None,
                transaction_id: transaction_id.clone(),
                project_id: session.project_id.as_ref().map(|p| p.as_str().to_string()),
                signature: None,
            },
            signer,
        )?;

        if let Some(cascade) = cascade_id {
            self.db
                .mark_cascade_phase(cascade, Phase::Preflight, Some(gate.passed))?;
        }

        Ok(SubmissionOutcome {
            reflex_id: reflex.id,
            transaction_id: transaction_id.clone(),
            phase: Phase::Preflight,
            round,
            confidence: assessment.vectors.confidence(),
            gate_result: Some(gate),
            recommended_action: recommended,
            drift: None,
            safe_to_proceed: true,
            learning_delta: None,
            reflex: Some(reflex),
        })
    }

    /// CHECK: rounds increase strictly; the declared decision controls
    /// whether ACT unlocks. Severe drift clears `safe_to_proceed`.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_check(
        &self,
        session_id: &SessionId,
        cascade_id: Option<&CascadeId>,
        transaction_id: &TransactionId,
        assessment: &Assessment,
        decision: CheckDecision,
        declared_round: Option<u32>,
        findings: &[String],
        remaining_unknowns: &[String],
        signer: Option<&dyn ReflexSigner>,
    ) -> Result<SubmissionOutcome> {
        let session = self.db.get_session(session_id)?;
        let progress = self.db.transaction_progress(transaction_id)?;
        let round = progress.admit(Phase::Check)?;

        if let Some(declared) = declared_round
            && declared != round
        {
            return Err(EmpiricaError::IllegalTransition {
                current: progress.state().as_str().to_string(),
                attempted: format!("reflex.submit_check (round {})", declared),
                expected: vec![format!("reflex.submit_check (round {})", round)],
            });
        }

        let (know_offset, uncertainty_offset) =
            drift::gate_offsets(self.db, &session.ai_id, CalibrationTrack::Noetic)?;
        let gate = readiness_gate(
            &assessment.vectors,
            self.config.gates.tau_know,
            self.config.gates.tau_uncertainty,
            know_offset,
            uncertainty_offset,
        );

        let reflex = self.insert(
            NewReflex {
                session_id: session_id.clone(),
                cascade_id: cascade_id.cloned(),
                phase: Phase::Check,
                round,
                vectors: assessment.vectors,
                reasoning: assessment.reasoning.clone(),
                evidence: assessment.evidence.clone(),
                decision: Some(decision),
                transaction_id: transaction_id.clone(),
                project_id: session.project_id.as_ref().map(|p| p.as_str().to_string()),
                signature: None,
            },
            signer,
        )?;

        self.log_check_trail(session_id, transaction_id, findings, remaining_unknowns)?;

        if let Some(cascade) = cascade_id {
            self.db.mark_cascade_phase(cascade, Phase::Check, None)?;
            self.db.record_investigation_round(cascade, round)?;
        }

        let drift_report = drift::analyze(self.db, session_id, &self.config.drift)?;
        if drift_report.severity == DriftSeverity::Severe {
            self.db.flag_session_drift(session_id)?;
        }
        let safe = drift_report.safe_to_proceed;

        let recommended = if !safe || !gate.passed {
            RecommendedAction::Investigate
        } else {
            match decision {
                CheckDecision::Proceed => RecommendedAction::Proceed,
                CheckDecision::ProceedWithCaution => RecommendedAction::ProceedWithCaution,
                CheckDecision::Investigate => RecommendedAction::Investigate,
            }
        };

        Ok(SubmissionOutcome {
            reflex_id: reflex.id,
            transaction_id: transaction_id.clone(),
            phase: Phase::Check,
            round,
            confidence: assessment.vectors.confidence(),
            gate_result: Some(gate),
            recommended_action: recommended,
            drift: Some(drift_report),
            safe_to_proceed: safe,
            learning_delta: None,
            reflex: Some(reflex),
        })
    }

    /// ACT: requires a proceed-decision CHECK and is blocked outright by
    /// severe drift.
    pub fn submit_act(
        &self,
        session_id: &SessionId,
        cascade_id: Option<&CascadeId>,
        transaction_id: &TransactionId,
        assessment: &Assessment,
        signer: Option<&dyn ReflexSigner>,
    ) -> Result<SubmissionOutcome> {
        let session = self.db.get_session(session_id)?;
        let progress = self.db.transaction_progress(transaction_id)?;
        let round = progress.admit(Phase::Act)?;

        let drift_report = drift::analyze(self.db, session_id, &self.config.drift)?;
        if drift_report.severity == DriftSeverity::Severe {
            return Err(EmpiricaError::SevereDrift {
                magnitude: drift_report.magnitude,
            });
        }

        let reflex = self.insert(
            NewReflex {
                session_id: session_id.clone(),
                cascade_id: cascade_id.cloned(),
                phase: Phase::Act,
                round,
                vectors: assessment.vectors,
                reasoning: assessment.reasoning.clone(),
                evidence: assessment.evidence.clone(),
                decision: None,
                transaction_id: transaction_id.clone(),
                project_id: session.project_id.as_ref().map(|p| p.as_str().to_string()),
                signature: None,
            },
            signer,
        )?;

        if let Some(cascade) = cascade_id {
            self.db.mark_cascade_phase(cascade, Phase::Act, None)?;
        }

        Ok(SubmissionOutcome {
            reflex_id: reflex.id,
            transaction_id: transaction_id.clone(),
            phase: Phase::Act,
            round,
            confidence: assessment.vectors.confidence(),
            gate_result: None,
            recommended_action: RecommendedAction::Proceed,
            drift: Some(drift_report),
            safe_to_proceed: true,
            learning_delta: None,
            reflex: Some(reflex),
        })
    }

    /// POSTFLIGHT: closes the transaction, computes the learning delta
    /// against the opening PREFLIGHT, routes grounded evidence into the
    /// praxic calibration track, and writes final aggregates.
    pub fn submit_postflight(
        &self,
        session_id: &SessionId,
        cascade_id: Option<&CascadeId>,
        transaction_id: &TransactionId,
        assessment: &Assessment,
        evidence_records: &[EvidenceRecord],
        signer: Option<&dyn ReflexSigner>,
    ) -> Result<SubmissionOutcome> {
        let session = self.db.get_session(session_id)?;
        let progress = self.db.transaction_progress(transaction_id)?;
        let round = progress.admit(Phase::Postflight)?;

        let preflight = self
            .db
            .find_reflex(session_id, transaction_id, Phase::Preflight, 1)?
            .ok_or_else(|| EmpiricaError::Storage(
                "transaction admitted POSTFLIGHT without a PREFLIGHT reflex".to_string(),
            ))?;
        let learning_delta = preflight.vectors.delta(&assessment.vectors);

        let reflex = self.insert(
            NewReflex {
                session_id: session_id.clone(),
                cascade_id: cascade_id.cloned(),
                phase: Phase::Postflight,
                round,
                vectors: assessment.vectors,
                reasoning: assessment.reasoning.clone(),
                evidence: assessment.evidence.clone(),
                decision: None,
                transaction_id: transaction_id.clone(),
                project_id: session.project_id.as_ref().map(|p| p.as_str().to_string()),
                signature: None,
            },
            signer,
        )?;

        drift::route_evidence(
            self.db,
            &session.ai_id,
            session_id,
            Phase::Postflight,
            &assessment.vectors,
            evidence_records,
        )?;

        if let Some(cascade) = cascade_id {
            let final_action = progress
                .last_decision
                .map(|d| d.as_str())
                .unwrap_or("completed");
            self.db
                .finalize_cascade(cascade, final_action, assessment.vectors.confidence())?;
        }

        Ok(SubmissionOutcome {
            reflex_id: reflex.id,
            transaction_id: transaction_id.clone(),
            phase: Phase::Postflight,
            round,
            confidence: assessment.vectors.confidence(),
            gate_result: None,
            recommended_action: RecommendedAction::Proceed,
            drift: None,
            safe_to_proceed: true,
            learning_delta: Some(learning_delta),
            reflex: Some(reflex),
        })
    }

    /// Admin: force-close open transactions older than the horizon by
    /// synthesising an abandoned POSTFLIGHT from the last recorded state.
    pub fn force_close_stale(&self, horizon_hours: i64) -> Result<Vec<TransactionId>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(horizon_hours)).to_rfc3339();
        let mut closed = Vec::new();

        for (session_id, transaction_id) in self.db.stale_open_transactions(&cutoff)? {
            let reflexes = self.db.transaction_reflexes(&transaction_id)?;
            let Some(last) = reflexes.last() else {
                continue;
            };

            let reflex = self.db.insert_reflex(NewReflex {
                session_id: session_id.clone(),
                cascade_id: last.cascade_id.clone(),
                phase: Phase::Postflight,
                round: 1,
                vectors: last.vectors,
                reasoning: format!(
                    "abandoned: force-closed after {}h without POSTFLIGHT",
                    horizon_hours
                ),
                evidence: None,
                decision: None,
                transaction_id: transaction_id.clone(),
                project_id: last.project_id.clone(),
                signature: None,
            })?;
            self.after_insert(&reflex)?;

            if let Some(cascade) = &last.cascade_id {
                // The synthesized close treats missing phases as vacuously done
                self.db.mark_cascade_phase(cascade, Phase::Check, None)?;
                self.db
                    .finalize_cascade(cascade, "abandoned", last.vectors.confidence())?;
            }

            tracing::info!(transaction_id = %transaction_id, "Force-closed stale transaction");
            closed.push(transaction_id);
        }
        Ok(closed)
    }

    /// Current observable state of a transaction.
    pub fn progress(&self, transaction_id: &TransactionId) -> Result<TransactionProgress> {
        self.db.transaction_progress(transaction_id)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn readiness_recommendation(
        &self,
        ai_id: &crate::types::AiId,
        assessment: &Assessment,
    ) -> Result<RecommendedAction> {
        let (know_offset, uncertainty_offset) =
            drift::gate_offsets(self.db, ai_id, CalibrationTrack::Noetic)?;
        let gate = readiness_gate(
            &assessment.vectors,
            self.config.gates.tau_know,
            self.config.gates.tau_uncertainty,
            know_offset,
            uncertainty_offset,
        );
        Ok(if gate.passed {
            RecommendedAction::Proceed
        } else {
            RecommendedAction::Investigate
        })
    }

    fn log_check_trail(
        &self,
        session_id: &SessionId,
        transaction_id: &TransactionId,
        findings: &[String],
        remaining_unknowns: &[String],
    ) -> Result<()> {
        let links = BreadcrumbLinks {
            transaction_id: Some(transaction_id.as_str().to_string()),
            ..Default::default()
        };
        for finding in findings {
            if !finding.trim().is_empty() {
                self.db.log_breadcrumb(
                    BreadcrumbKind::Finding,
                    session_id,
                    finding,
                    None,
                    links.clone(),
                )?;
            }
        }
        for unknown in remaining_unknowns {
            if !unknown.trim().is_empty() {
                self.db.log_breadcrumb(
                    BreadcrumbKind::Unknown,
                    session_id,
                    unknown,
                    None,
                    links.clone(),
                )?;
            }
        }
        Ok(())
    }

    fn after_insert(&self, reflex: &Reflex) -> Result<()> {
        if let Some(project) = &reflex.project_id {
            self.db
                .bump_project_reflex_count(&crate::types::ProjectId::new(project.clone()))?;
        }
        Ok(())
    }
}
