//! Thirteen-Vector Epistemic Model
//!
//! The scored self-model an agent submits at each CASCADE phase:
//! three weighted tiers plus the engagement gate vector and the meta
//! `uncertainty` vector. Composite confidence is always derived from the
//! vectors, never stored as independent ground truth.
//!
//! All arithmetic is IEEE-754 double precision; values round-trip through
//! the store bit-for-bit.

pub mod assessment;

pub use assessment::{Assessment, EvidenceRecord};

use serde::{Deserialize, Serialize};

use crate::constants::weights;

// =============================================================================
// Vector Names & Tiers
// =============================================================================

/// Tier membership for the composite-confidence calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// know / do / context, weight 0.35
    Foundation,
    /// clarity / coherence / signal / density, weight 0.25
    Comprehension,
    /// state / change / completion / impact, weight 0.25
    Execution,
    /// engagement, weight 0.15
    Engagement,
    /// uncertainty; not a weighted component, used directly in gates
    Meta,
}

impl Tier {
    pub fn weight(&self) -> f64 {
        match self {
            Self::Foundation => weights::FOUNDATION,
            Self::Comprehension => weights::COMPREHENSION,
            Self::Execution => weights::EXECUTION,
            Self::Engagement => weights::ENGAGEMENT,
            Self::Meta => 0.0,
        }
    }
}

/// One of the thirteen named vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Vector {
    Know,
    Do,
    Context,
    Clarity,
    Coherence,
    Signal,
    Density,
    State,
    Change,
    Completion,
    Impact,
    Engagement,
    Uncertainty,
}

impl Vector {
    /// All thirteen vectors in canonical (wire) order.
    pub const ALL: [Vector; 13] = [
        Vector::Know,
        Vector::Do,
        Vector::Context,
        Vector::Clarity,
        Vector::Coherence,
        Vector::Signal,
        Vector::Density,
        Vector::State,
        Vector::Change,
        Vector::Completion,
        Vector::Impact,
        Vector::Engagement,
        Vector::Uncertainty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Know => "know",
            Self::Do => "do",
            Self::Context => "context",
            Self::Clarity => "clarity",
            Self::Coherence => "coherence",
            Self::Signal => "signal",
            Self::Density => "density",
            Self::State => "state",
            Self::Change => "change",
            Self::Completion => "completion",
            Self::Impact => "impact",
            Self::Engagement => "engagement",
            Self::Uncertainty => "uncertainty",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    pub fn tier(&self) -> Tier {
        match self {
            Self::Know | Self::Do | Self::Context => Tier::Foundation,
            Self::Clarity | Self::Coherence | Self::Signal | Self::Density => Tier::Comprehension,
            Self::State | Self::Change | Self::Completion | Self::Impact => Tier::Execution,
            Self::Engagement => Tier::Engagement,
            Self::Uncertainty => Tier::Meta,
        }
    }

    /// Whether a larger value is better.
    ///
    /// `density` counts as higher-is-better because 1 represents manageable
    /// load; `uncertainty` is the only inverted vector.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Self::Uncertainty)
    }
}

impl std::fmt::Display for Vector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Vector Map
// =============================================================================

/// A complete scored assessment: one f64 per vector, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorMap {
    pub know: f64,
    pub r#do: f64,
    pub context: f64,
    pub clarity: f64,
    pub coherence: f64,
    pub signal: f64,
    pub density: f64,
    pub state: f64,
    pub change: f64,
    pub completion: f64,
    pub impact: f64,
    pub engagement: f64,
    pub uncertainty: f64,
}

impl VectorMap {
    pub fn get(&self, vector: Vector) -> f64 {
        match vector {
            Vector::Know => self.know,
            Vector::Do => self.r#do,
            Vector::Context => self.context,
            Vector::Clarity => self.clarity,
            Vector::Coherence => self.coherence,
            Vector::Signal => self.signal,
            Vector::Density => self.density,
            Vector::State => self.state,
            Vector::Change => self.change,
            Vector::Completion => self.completion,
            Vector::Impact => self.impact,
            Vector::Engagement => self.engagement,
            Vector::Uncertainty => self.uncertainty,
        }
    }

    pub fn set(&mut self, vector: Vector, value: f64) {
        let slot = match vector {
            Vector::Know => &mut self.know,
            Vector::Do => &mut self.r#do,
            Vector::Context => &mut self.context,
            Vector::Clarity => &mut self.clarity,
            Vector::Coherence => &mut self.coherence,
            Vector::Signal => &mut self.signal,
            Vector::Density => &mut self.density,
            Vector::State => &mut self.state,
            Vector::Change => &mut self.change,
            Vector::Completion => &mut self.completion,
            Vector::Impact => &mut self.impact,
            Vector::Engagement => &mut self.engagement,
            Vector::Uncertainty => &mut self.uncertainty,
        };
        *slot = value;
    }

    /// Iterate (vector, score) pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Vector, f64)> + '_ {
        Vector::ALL.iter().map(move |v| (*v, self.get(*v)))
    }

    /// Check every score is a finite value in [0, 1].
    ///
    /// Exactly 0 and exactly 1 are accepted; anything outside, or NaN, is
    /// rejected with the offending vector named.
    pub fn validate(&self) -> crate::types::Result<()> {
        for (vector, score) in self.iter() {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(crate::types::EmpiricaError::invalid_field(
                    vector.as_str(),
                    format!("score {} outside [0, 1]", score),
                ));
            }
        }
        Ok(())
    }

    /// Arithmetic mean of the vectors in one tier.
    ///
    /// `Tier::Meta` yields `uncertainty` itself.
    pub fn tier_score(&self, tier: Tier) -> f64 {
        let members: Vec<f64> = Vector::ALL
            .iter()
            .filter(|v| v.tier() == tier)
            .map(|v| self.get(*v))
            .collect();
        members.iter().sum::<f64>() / members.len() as f64
    }

    /// Tier-weighted composite confidence, for gating and display only.
    pub fn confidence(&self) -> f64 {
        weights::FOUNDATION * self.tier_score(Tier::Foundation)
            + weights::COMPREHENSION * self.tier_score(Tier::Comprehension)
            + weights::EXECUTION * self.tier_score(Tier::Execution)
            + weights::ENGAGEMENT * self.engagement
    }

    /// Per-vector signed difference `other - self`.
    ///
    /// Positive delta on learning vectors indicates learning; negative delta
    /// on `uncertainty` indicates clarification.
    pub fn delta(&self, other: &VectorMap) -> VectorDelta {
        let mut deltas = VectorMap::zeroed_raw();
        for (vector, score) in self.iter() {
            deltas.set(vector, other.get(vector) - score);
        }
        VectorDelta(deltas)
    }

    // Internal: a map outside the validated range, used as delta storage.
    fn zeroed_raw() -> VectorMap {
        VectorMap {
            know: 0.0,
            r#do: 0.0,
            context: 0.0,
            clarity: 0.0,
            coherence: 0.0,
            signal: 0.0,
            density: 0.0,
            state: 0.0,
            change: 0.0,
            completion: 0.0,
            impact: 0.0,
            engagement: 0.0,
            uncertainty: 0.0,
        }
    }
}

// =============================================================================
// Delta
// =============================================================================

/// Signed per-vector learning delta between two reflexes of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorDelta(VectorMap);

impl VectorDelta {
    pub fn get(&self, vector: Vector) -> f64 {
        self.0.get(vector)
    }

    /// Mean absolute change across all thirteen vectors.
    pub fn mean_abs(&self) -> f64 {
        self.0.iter().map(|(_, d)| d.abs()).sum::<f64>() / Vector::ALL.len() as f64
    }

    /// Net directional movement on improvement axes: positive values on
    /// higher-is-better vectors and negated `uncertainty` movement.
    pub fn learning_signal(&self) -> f64 {
        self.0
            .iter()
            .map(|(v, d)| if v.higher_is_better() { d } else { -d })
            .sum::<f64>()
            / Vector::ALL.len() as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = (Vector, f64)> + '_ {
        self.0.iter()
    }
}

// =============================================================================
// Gates
// =============================================================================

/// Outcome of evaluating a gate predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    /// Vectors that failed the predicate, with observed and required values
    pub failures: Vec<GateFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateFailure {
    pub vector: String,
    pub observed: f64,
    pub required: f64,
}

/// Recommended next move returned with every gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Proceed,
    ProceedWithCaution,
    Investigate,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::ProceedWithCaution => "proceed_with_caution",
            Self::Investigate => "investigate",
        }
    }
}

/// Readiness gate: `know >= tau_know && uncertainty <= tau_uncertainty`.
///
/// `know_offset` / `uncertainty_offset` are additive calibration corrections
/// (zero when no calibration history exists). Fails closed: an out-of-range
/// map never reaches this point, but a failed predicate always reports which
/// side failed.
pub fn readiness_gate(
    vectors: &VectorMap,
    tau_know: f64,
    tau_uncertainty: f64,
    know_offset: f64,
    uncertainty_offset: f64,
) -> GateResult {
    let know = vectors.know + know_offset;
    let uncertainty = vectors.uncertainty + uncertainty_offset;

    let mut failures = Vec::new();
    if know < tau_know {
        failures.push(GateFailure {
            vector: Vector::Know.as_str().to_string(),
            observed: know,
            required: tau_know,
        });
    }
    if uncertainty > tau_uncertainty {
        failures.push(GateFailure {
            vector: Vector::Uncertainty.as_str().to_string(),
            observed: uncertainty,
            required: tau_uncertainty,
        });
    }

    GateResult {
        passed: failures.is_empty(),
        failures,
    }
}

/// Engagement gate at PREFLIGHT: `engagement >= threshold`.
///
/// Exactly the threshold passes. Failure always recommends INVESTIGATE
/// regardless of other scores.
pub fn engagement_gate(vectors: &VectorMap, threshold: f64) -> GateResult {
    if vectors.engagement >= threshold {
        GateResult {
            passed: true,
            failures: Vec::new(),
        }
    } else {
        GateResult {
            passed: false,
            failures: vec![GateFailure {
                vector: Vector::Engagement.as_str().to_string(),
                observed: vectors.engagement,
                required: threshold,
            }],
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_map() -> VectorMap {
        VectorMap {
            know: 0.6,
            r#do: 0.7,
            context: 0.75,
            clarity: 0.7,
            coherence: 0.8,
            signal: 0.7,
            density: 0.4,
            state: 0.6,
            change: 0.2,
            completion: 0.0,
            impact: 0.5,
            engagement: 0.8,
            uncertainty: 0.4,
        }
    }

    #[test]
    fn test_tier_membership_is_complete() {
        let mut foundation = 0;
        let mut comprehension = 0;
        let mut execution = 0;
        for v in Vector::ALL {
            match v.tier() {
                Tier::Foundation => foundation += 1,
                Tier::Comprehension => comprehension += 1,
                Tier::Execution => execution += 1,
                _ => {}
            }
        }
        assert_eq!((foundation, comprehension, execution), (3, 4, 4));
    }

    #[test]
    fn test_confidence_is_weighted_tier_sum() {
        let m = sample_map();
        let foundation = (0.6 + 0.7 + 0.75) / 3.0;
        let comprehension = (0.7 + 0.8 + 0.7 + 0.4) / 4.0;
        let execution = (0.6 + 0.2 + 0.0 + 0.5) / 4.0;
        let expected = 0.35 * foundation + 0.25 * comprehension + 0.25 * execution + 0.15 * 0.8;
        assert!((m.confidence() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_uncertainty_not_in_confidence() {
        let mut a = sample_map();
        let mut b = sample_map();
        a.uncertainty = 0.0;
        b.uncertainty = 1.0;
        assert_eq!(a.confidence(), b.confidence());
    }

    #[test]
    fn test_validate_boundaries() {
        let mut m = sample_map();
        m.know = 0.0;
        m.completion = 1.0;
        assert!(m.validate().is_ok());

        m.know = -f64::EPSILON;
        assert!(m.validate().is_err());

        m.know = 1.0 + f64::EPSILON;
        assert!(m.validate().is_err());

        m.know = f64::NAN;
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_delta_signs() {
        let before = sample_map();
        let mut after = before;
        after.know = 0.9;
        after.uncertainty = 0.15;

        let delta = before.delta(&after);
        assert!((delta.get(Vector::Know) - 0.30).abs() < 1e-12);
        assert!((delta.get(Vector::Uncertainty) + 0.25).abs() < 1e-12);
        assert_eq!(delta.get(Vector::Impact), 0.0);
        assert!(delta.learning_signal() > 0.0);
    }

    #[test]
    fn test_readiness_gate_defaults() {
        let mut m = sample_map();
        let gate = readiness_gate(&m, 0.70, 0.35, 0.0, 0.0);
        assert!(!gate.passed);
        assert_eq!(gate.failures.len(), 2);

        m.know = 0.70;
        m.uncertainty = 0.35;
        let gate = readiness_gate(&m, 0.70, 0.35, 0.0, 0.0);
        assert!(gate.passed);
    }

    #[test]
    fn test_readiness_gate_applies_offsets() {
        let mut m = sample_map();
        m.know = 0.68;
        m.uncertainty = 0.30;
        // A +0.05 know correction from calibration history flips the verdict.
        assert!(!readiness_gate(&m, 0.70, 0.35, 0.0, 0.0).passed);
        assert!(readiness_gate(&m, 0.70, 0.35, 0.05, 0.0).passed);
    }

    #[test]
    fn test_engagement_gate_boundary() {
        let mut m = sample_map();
        m.engagement = 0.60;
        assert!(engagement_gate(&m, 0.60).passed);

        m.engagement = 0.60 - 1e-9;
        let gate = engagement_gate(&m, 0.60);
        assert!(!gate.passed);
        assert_eq!(gate.failures[0].vector, "engagement");
    }

    #[test]
    fn test_serde_wire_names() {
        let m = sample_map();
        let value = serde_json::to_value(m).expect("serialize");
        // Raw identifier serialises as the bare vector name.
        assert_eq!(value["do"], 0.7);
        assert_eq!(value["uncertainty"], 0.4);
        let back: VectorMap = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, m);
    }
}
