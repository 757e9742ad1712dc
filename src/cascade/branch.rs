//! Investigation branch scoring.
//!
//! Optional subsystem: when an agent explores several investigation
//! branches inside one CHECK loop, the merge decision ranks them by
//! `(learning_delta × quality × (1 − uncertainty)) / cost_penalty`.
//! The quality term is a pluggable strategy; the default weighs the
//! branch's evidence count.

use serde::{Deserialize, Serialize};

use crate::vectors::VectorDelta;

/// One candidate branch with its observed outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSample {
    pub label: String,
    /// Delta between the branch's entry and exit assessments
    pub delta: VectorDelta,
    /// Exit uncertainty of the branch, in [0, 1]
    pub uncertainty: f64,
    /// Relative cost of the branch; 1.0 is the baseline, never below
    pub cost_penalty: f64,
    /// Evidence records the branch produced
    pub evidence_count: usize,
}

/// Pluggable branch-quality strategy.
pub trait BranchQuality {
    /// Quality of a branch in [0, 1].
    fn quality(&self, branch: &BranchSample) -> f64;
}

/// Default strategy: quality saturates with gathered evidence.
pub struct EvidenceWeighted;

impl BranchQuality for EvidenceWeighted {
    fn quality(&self, branch: &BranchSample) -> f64 {
        let n = branch.evidence_count as f64;
        n / (n + 2.0)
    }
}

/// Merge score of one branch under a quality strategy.
pub fn merge_score(branch: &BranchSample, quality: &dyn BranchQuality) -> f64 {
    let learning = branch.delta.learning_signal().max(0.0);
    let q = quality.quality(branch).clamp(0.0, 1.0);
    let cost = branch.cost_penalty.max(1.0);
    learning * q * (1.0 - branch.uncertainty.clamp(0.0, 1.0)) / cost
}

/// Pick the branch auto-merge should take, highest score first.
pub fn select_best<'a>(
    branches: &'a [BranchSample],
    quality: &dyn BranchQuality,
) -> Option<(&'a BranchSample, f64)> {
    branches
        .iter()
        .map(|b| (b, merge_score(b, quality)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::{Vector, VectorMap};

    fn delta(know_gain: f64) -> VectorDelta {
        let before = VectorMap {
            know: 0.4,
            r#do: 0.5,
            context: 0.5,
            clarity: 0.5,
            coherence: 0.5,
            signal: 0.5,
            density: 0.5,
            state: 0.5,
            change: 0.5,
            completion: 0.5,
            impact: 0.5,
            engagement: 0.7,
            uncertainty: 0.4,
        };
        let mut after = before;
        after.set(Vector::Know, 0.4 + know_gain);
        before.delta(&after)
    }

    fn branch(label: &str, know_gain: f64, uncertainty: f64, cost: f64) -> BranchSample {
        BranchSample {
            label: label.to_string(),
            delta: delta(know_gain),
            uncertainty,
            cost_penalty: cost,
            evidence_count: 4,
        }
    }

    #[test]
    fn test_learning_branch_beats_stagnant() {
        let branches = vec![
            branch("stagnant", 0.0, 0.3, 1.0),
            branch("learned", 0.4, 0.3, 1.0),
        ];
        let (best, score) = select_best(&branches, &EvidenceWeighted).expect("best");
        assert_eq!(best.label, "learned");
        assert!(score > 0.0);
    }

    #[test]
    fn test_cost_penalty_divides() {
        let cheap = branch("cheap", 0.4, 0.3, 1.0);
        let expensive = branch("expensive", 0.4, 0.3, 4.0);
        let quality = EvidenceWeighted;
        let ratio = merge_score(&cheap, &quality) / merge_score(&expensive, &quality);
        assert!((ratio - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_uncertain_branch_discounted() {
        let confident = branch("confident", 0.4, 0.1, 1.0);
        let uncertain = branch("uncertain", 0.4, 0.9, 1.0);
        let quality = EvidenceWeighted;
        assert!(merge_score(&confident, &quality) > merge_score(&uncertain, &quality));
    }

    #[test]
    fn test_empty_and_negative_learning() {
        assert!(select_best(&[], &EvidenceWeighted).is_none());
        // A branch that only lost ground scores zero, never negative
        let regressed = branch("regressed", -0.4, 0.2, 1.0);
        assert_eq!(merge_score(&regressed, &EvidenceWeighted), 0.0);
    }
}
