//! Grounded calibration routing.
//!
//! Evidence supplied with CHECK and POSTFLIGHT submissions is routed into
//! the noetic (investigation) or praxic (action) track and folded into the
//! per-(agent, vector) running state. The accumulated posterior yields the
//! additive offsets applied to readiness-gate comparisons.

use serde::{Deserialize, Serialize};

use crate::cascade::Phase;
use crate::store::{CalibrationPoint, CalibrationTrack, Database};
use crate::types::{AiId, Result, SessionId};
use crate::vectors::{EvidenceRecord, Vector, VectorMap};

/// One vector's state after an evidence update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationUpdate {
    pub vector: String,
    pub track: CalibrationTrack,
    pub gap: f64,
    pub posterior_mean_gap: f64,
    pub gate_offset: f64,
    pub observations: f64,
}

/// Both calibration tracks for one agent, reported separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub noetic: Vec<CalibrationUpdate>,
    pub praxic: Vec<CalibrationUpdate>,
}

/// The track grounding evidence lands in, by submission phase.
pub fn track_for_phase(phase: Phase) -> CalibrationTrack {
    match phase {
        Phase::Check => CalibrationTrack::Noetic,
        _ => CalibrationTrack::Praxic,
    }
}

/// Fold a batch of grounded evidence into the calibration state.
///
/// Each record grounds every vector it names: the gap is the self-assessed
/// value minus the grounded value, weighted by evidence quality.
pub fn route_evidence(
    db: &Database,
    ai_id: &AiId,
    session_id: &SessionId,
    phase: Phase,
    self_vectors: &VectorMap,
    records: &[EvidenceRecord],
) -> Result<Vec<CalibrationUpdate>> {
    let track = track_for_phase(phase);
    let mut updates = Vec::new();

    for record in records {
        record.validate()?;
        for vector_name in &record.supports_vectors {
            // validate() guarantees the name parses
            let Some(vector) = Vector::try_parse(vector_name) else {
                continue;
            };
            let self_value = self_vectors.get(vector);
            let gap = self_value - record.normalised_value;

            let state = db.record_calibration(&CalibrationPoint {
                ai_id: ai_id.clone(),
                session_id: session_id.clone(),
                vector: vector_name.clone(),
                track,
                self_value,
                grounded_value: record.normalised_value,
                gap,
                quality: record.quality,
            })?;

            updates.push(CalibrationUpdate {
                vector: vector_name.clone(),
                track,
                gap,
                posterior_mean_gap: state.posterior_mean(),
                gate_offset: state.gate_offset(),
                observations: state.observations,
            });
        }
    }

    Ok(updates)
}

/// Additive corrections for the readiness gate: (know, uncertainty).
///
/// Missing state yields zero offsets; calibration never blocks an
/// uncalibrated agent.
pub fn gate_offsets(db: &Database, ai_id: &AiId, track: CalibrationTrack) -> Result<(f64, f64)> {
    let know = db
        .get_calibration_state(ai_id, Vector::Know.as_str(), track)?
        .map(|s| s.gate_offset())
        .unwrap_or(0.0);
    let uncertainty = db
        .get_calibration_state(ai_id, Vector::Uncertainty.as_str(), track)?
        .map(|s| s.gate_offset())
        .unwrap_or(0.0);
    Ok((know, uncertainty))
}

/// Assemble the two-track report for one agent.
pub fn report(db: &Database, ai_id: &AiId) -> Result<CalibrationReport> {
    let mut noetic = Vec::new();
    let mut praxic = Vec::new();
    for state in db.list_calibration_states(ai_id)? {
        let update = CalibrationUpdate {
            vector: state.vector.clone(),
            track: state.track,
            gap: state.mean_gap,
            posterior_mean_gap: state.posterior_mean(),
            gate_offset: state.gate_offset(),
            observations: state.observations,
        };
        match state.track {
            CalibrationTrack::Noetic => noetic.push(update),
            CalibrationTrack::Praxic => praxic.push(update),
        }
    }
    Ok(CalibrationReport { noetic, praxic })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AiId;

    fn vectors() -> VectorMap {
        VectorMap {
            know: 0.9,
            r#do: 0.5,
            context: 0.5,
            clarity: 0.5,
            coherence: 0.5,
            signal: 0.5,
            density: 0.5,
            state: 0.5,
            change: 0.5,
            completion: 0.8,
            impact: 0.5,
            engagement: 0.7,
            uncertainty: 0.3,
        }
    }

    fn evidence(value: f64, supports: &[&str]) -> EvidenceRecord {
        EvidenceRecord {
            metric: "tests_passed".to_string(),
            normalised_value: value,
            supports_vectors: supports.iter().map(|s| s.to_string()).collect(),
            quality: 0.9,
        }
    }

    #[test]
    fn test_route_by_phase() {
        assert_eq!(track_for_phase(Phase::Check), CalibrationTrack::Noetic);
        assert_eq!(track_for_phase(Phase::Postflight), CalibrationTrack::Praxic);
    }

    #[test]
    fn test_overestimation_yields_negative_offset() {
        let db = Database::open_in_memory().expect("open");
        let ai = AiId::new("agent-A");
        let session = db
            .create_session(&ai, 0, None, None, None)
            .expect("session")
            .session_id;

        // self know = 0.9, grounded = 0.5: chronic overestimation
        for _ in 0..10 {
            route_evidence(
                &db,
                &ai,
                &session,
                Phase::Postflight,
                &vectors(),
                &[evidence(0.5, &["know"])],
            )
            .expect("route");
        }

        let (know_offset, uncertainty_offset) =
            gate_offsets(&db, &ai, CalibrationTrack::Praxic).expect("offsets");
        assert!(know_offset < 0.0);
        assert_eq!(uncertainty_offset, 0.0);
    }

    #[test]
    fn test_tracks_are_separate() {
        let db = Database::open_in_memory().expect("open");
        let ai = AiId::new("agent-A");
        let session = db
            .create_session(&ai, 0, None, None, None)
            .expect("session")
            .session_id;

        route_evidence(
            &db,
            &ai,
            &session,
            Phase::Check,
            &vectors(),
            &[evidence(0.5, &["know"])],
        )
        .expect("noetic");
        route_evidence(
            &db,
            &ai,
            &session,
            Phase::Postflight,
            &vectors(),
            &[evidence(0.8, &["completion"])],
        )
        .expect("praxic");

        let report = report(&db, &ai).expect("report");
        assert_eq!(report.noetic.len(), 1);
        assert_eq!(report.praxic.len(), 1);
        assert_eq!(report.noetic[0].vector, "know");
        assert_eq!(report.praxic[0].vector, "completion");

        // Noetic evidence does not leak into praxic gate offsets
        let (know_offset, _) = gate_offsets(&db, &ai, CalibrationTrack::Praxic).expect("offsets");
        assert_eq!(know_offset, 0.0);
    }

    #[test]
    fn test_uncalibrated_agent_gets_zero_offsets() {
        let db = Database::open_in_memory().expect("open");
        let (know, uncertainty) =
            gate_offsets(&db, &AiId::new("fresh"), CalibrationTrack::Praxic).expect("offsets");
        assert_eq!((know, uncertainty), (0.0, 0.0));
    }
}
