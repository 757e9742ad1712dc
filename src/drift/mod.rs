//! Drift and Calibration Observers
//!
//! Both observers are read-only over the store. Successive-assessment drift
//! fails open: too little data never blocks work. Severe drift fails
//! closed: it clears `safe_to_proceed` and blocks ACT.

pub mod calibration;

pub use calibration::{CalibrationReport, CalibrationUpdate, gate_offsets, route_evidence};

use serde::{Deserialize, Serialize};

use crate::config::DriftConfig;
use crate::store::Database;
use crate::types::{Result, SessionId};
use crate::vectors::Vector;

// =============================================================================
// Successive-Assessment Drift
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    InsufficientData,
    Minor,
    Moderate,
    Severe,
}

impl DriftSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient_data",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }
}

/// Band a drift magnitude: minor below the moderate threshold, severe at or
/// above the severe threshold, moderate between.
pub fn classify(magnitude: f64, config: &DriftConfig) -> DriftSeverity {
    if magnitude >= config.severe_threshold {
        DriftSeverity::Severe
    } else if magnitude >= config.moderate_threshold {
        DriftSeverity::Moderate
    } else {
        DriftSeverity::Minor
    }
}

/// Per-vector drift over the trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDrift {
    pub vector: String,
    /// Mean absolute successive change
    pub mean_abs_change: f64,
    /// Magnitude of the net directional change across the window
    pub directional: f64,
}

/// Drift analysis over a session's trailing reflexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub severity: DriftSeverity,
    /// Worst per-vector mean absolute change; the classification input
    pub magnitude: f64,
    /// Vectors ordered worst-first, reported when data sufficed
    pub vectors: Vec<VectorDrift>,
    /// Reflexes examined
    pub window: usize,
    pub safe_to_proceed: bool,
}

impl DriftReport {
    fn insufficient(window: usize) -> Self {
        Self {
            severity: DriftSeverity::InsufficientData,
            magnitude: 0.0,
            vectors: Vec::new(),
            window,
            safe_to_proceed: true,
        }
    }
}

/// Analyse successive-assessment drift over the last `config.window`
/// reflexes of a session.
///
/// The classification input is the worst single vector's mean absolute
/// change between consecutive assessments: an agent whose `know` swings by
/// 0.7 every round is drifting even if the other twelve vectors hold still.
pub fn analyze(db: &Database, session_id: &SessionId, config: &DriftConfig) -> Result<DriftReport> {
    let reflexes = db.latest_reflexes(session_id, config.window)?;
    if reflexes.len() < config.window {
        return Ok(DriftReport::insufficient(reflexes.len()));
    }

    let mut vectors = Vec::with_capacity(Vector::ALL.len());
    for vector in Vector::ALL {
        let mut abs_sum = 0.0;
        let mut signed_sum = 0.0;
        for pair in reflexes.windows(2) {
            let change = pair[1].vectors.get(vector) - pair[0].vectors.get(vector);
            abs_sum += change.abs();
            signed_sum += change;
        }
        let pairs = (reflexes.len() - 1) as f64;
        vectors.push(VectorDrift {
            vector: vector.as_str().to_string(),
            mean_abs_change: abs_sum / pairs,
            directional: (signed_sum / pairs).abs(),
        });
    }
    vectors.sort_by(|a, b| {
        b.mean_abs_change
            .partial_cmp(&a.mean_abs_change)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let magnitude = vectors.first().map(|v| v.mean_abs_change).unwrap_or(0.0);
    let severity = classify(magnitude, config);

    Ok(DriftReport {
        severity,
        magnitude,
        vectors,
        window: reflexes.len(),
        safe_to_proceed: severity != DriftSeverity::Severe,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{CheckDecision, Phase};
    use crate::store::NewReflex;
    use crate::types::{AiId, TransactionId};
    use crate::vectors::VectorMap;

    fn base_vectors() -> VectorMap {
        VectorMap {
            know: 0.5,
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
            uncertainty: 0.3,
        }
    }

    fn seed_session(db: &Database, knows: &[f64]) -> SessionId {
        let session = db
            .create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("session");
        let txn = TransactionId::generate();
        for (i, know) in knows.iter().enumerate() {
            let mut vectors = base_vectors();
            vectors.know = *know;
            let (phase, round, decision) = if i == 0 {
                (Phase::Preflight, 1, None)
            } else {
                (Phase::Check, i as u32, Some(CheckDecision::Investigate))
            };
            db.insert_reflex(NewReflex {
                session_id: session.session_id.clone(),
                cascade_id: None,
                phase,
                round,
                vectors,
                reasoning: "r".to_string(),
                evidence: None,
                decision,
                transaction_id: txn.clone(),
                project_id: None,
                signature: None,
            })
            .expect("reflex");
        }
        session.session_id
    }

    #[test]
    fn test_classification_boundaries() {
        let config = DriftConfig::default();
        assert_eq!(classify(0.29, &config), DriftSeverity::Minor);
        assert_eq!(classify(0.30, &config), DriftSeverity::Moderate);
        assert_eq!(classify(0.59, &config), DriftSeverity::Moderate);
        assert_eq!(classify(0.60, &config), DriftSeverity::Severe);
        assert_eq!(classify(0.95, &config), DriftSeverity::Severe);
    }

    #[test]
    fn test_insufficient_data_fails_open() {
        let db = Database::open_in_memory().expect("open");
        let session = seed_session(&db, &[0.1, 0.9]);

        let report = analyze(&db, &session, &DriftConfig::default()).expect("analyze");
        assert_eq!(report.severity, DriftSeverity::InsufficientData);
        assert!(report.safe_to_proceed);
        assert_eq!(report.window, 2);
    }

    #[test]
    fn test_stable_session_is_minor() {
        let db = Database::open_in_memory().expect("open");
        let session = seed_session(&db, &[0.5, 0.52, 0.55, 0.54, 0.56]);

        let report = analyze(&db, &session, &DriftConfig::default()).expect("analyze");
        assert_eq!(report.severity, DriftSeverity::Minor);
        assert!(report.safe_to_proceed);
    }

    #[test]
    fn test_oscillation_is_severe_and_blocks() {
        let db = Database::open_in_memory().expect("open");
        // know swings by 0.7 between every pair of assessments
        let session = seed_session(&db, &[0.1, 0.8, 0.1, 0.8, 0.1]);

        let report = analyze(&db, &session, &DriftConfig::default()).expect("analyze");
        assert_eq!(report.severity, DriftSeverity::Severe);
        assert!(!report.safe_to_proceed);
        assert!((report.magnitude - 0.7).abs() < 1e-9);
        assert_eq!(report.vectors[0].vector, "know");
        // Pure oscillation has little net direction
        assert!(report.vectors[0].directional < 0.2);
    }

    #[test]
    fn test_worst_vector_drives_classification() {
        let db = Database::open_in_memory().expect("open");
        // Single drifting vector among thirteen still classifies
        let session = seed_session(&db, &[0.0, 0.4, 0.0, 0.4, 0.0]);

        let report = analyze(&db, &session, &DriftConfig::default()).expect("analyze");
        assert_eq!(report.severity, DriftSeverity::Moderate);
    }
}
