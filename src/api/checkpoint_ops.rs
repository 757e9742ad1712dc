//! Checkpoint operations: create (re-mirror), load, list, diff.

use serde::Serialize;

use super::Core;
use crate::cascade::Phase;
use crate::checkpoint::{CheckpointPayload, MirrorOutcome};
use crate::store::StoredCheckpoint;
use crate::types::{EmpiricaError, Result};
use crate::vectors::VectorDelta;

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointDiff {
    pub session_id: String,
    pub from: String,
    pub to: String,
    pub delta: VectorDelta,
}

fn parse_phase(phase: &str) -> Result<Phase> {
    Phase::try_parse(phase).ok_or_else(|| {
        EmpiricaError::invalid_field(
            "phase",
            format!("'{}' is not one of PREFLIGHT, CHECK, ACT, POSTFLIGHT", phase),
        )
    })
}

impl Core {
    /// checkpoint.create: mirror the stored reflex at (session, phase,
    /// round) into the git notes layer again, e.g. after a clone.
    pub fn checkpoint_create(
        &self,
        session_id: &str,
        phase: &str,
        round: u32,
    ) -> Result<MirrorOutcome> {
        let session_id = self.resolve_session(session_id)?;
        let phase = parse_phase(phase)?;

        let reflexes = self.db().list_reflexes(&session_id)?;
        let reflex = reflexes
            .into_iter()
            .find(|r| {
                r.phase == phase && r.round == round
            })
            .ok_or_else(|| EmpiricaError::InsufficientData {
                what: format!("reflex {}/{}/{}", session_id, phase, round),
                have: 0,
                needed: 1,
            })?;

        self.checkpoints().mirror_reflex(&reflex)
    }

    /// checkpoint.load
    pub fn checkpoint_load(
        &self,
        session_id: &str,
        phase: &str,
        round: u32,
    ) -> Result<CheckpointPayload> {
        let session_id = self.resolve_session(session_id)?;
        let phase = parse_phase(phase)?;
        self.checkpoints().load(&session_id, phase, round)
    }

    /// checkpoint.list
    pub fn checkpoint_list(&self, session_id: &str) -> Result<Vec<StoredCheckpoint>> {
        let session_id = self.resolve_session(session_id)?;
        self.checkpoints().list(&session_id)
    }

    /// checkpoint.diff between two (phase, round) positions of one session.
    pub fn checkpoint_diff(
        &self,
        session_id: &str,
        from_phase: &str,
        from_round: u32,
        to_phase: &str,
        to_round: u32,
    ) -> Result<CheckpointDiff> {
        let session = self.resolve_session(session_id)?;
        let from = parse_phase(from_phase)?;
        let to = parse_phase(to_phase)?;
        let delta = self
            .checkpoints()
            .diff(&session, (from, from_round), (to, to_round))?;
        Ok(CheckpointDiff {
            session_id: session.into_inner(),
            from: format!("{}/{}", from, from_round),
            to: format!("{}/{}", to, to_round),
            delta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::reflex_ops::{CheckRequest, PreflightRequest};
    use crate::api::session_ops::SessionCreateRequest;
    use crate::api::test_support::core;
    use serde_json::json;

    fn flat(know: f64) -> serde_json::Value {
        json!({
            "know": know, "do": 0.7, "context": 0.75,
            "clarity": 0.7, "coherence": 0.8, "signal": 0.7, "density": 0.4,
            "state": 0.6, "change": 0.2, "completion": 0.0, "impact": 0.5,
            "engagement": 0.8, "uncertainty": 0.4,
            "reasoning": "r"
        })
    }

    #[test]
    fn test_list_load_diff() {
        let (_dir, core) = core();
        let sid = core
            .session_create(&SessionCreateRequest {
                ai_id: "agent-A".to_string(),
                bootstrap_level: 0,
                project_id: None,
                subject: None,
                user_id: None,
            })
            .expect("session")
            .session_id;

        core.submit_preflight(&PreflightRequest {
            session_id: sid.clone(),
            cascade_id: None,
            vectors: flat(0.6),
            sign: false,
        })
        .expect("preflight");
        core.submit_check(&CheckRequest {
            session_id: sid.clone(),
            cascade_id: None,
            vectors: flat(0.9),
            decision: "proceed".to_string(),
            round: None,
            findings: vec![],
            remaining_unknowns: vec![],
            sign: false,
        })
        .expect("check");

        let list = core.checkpoint_list(&sid).expect("list");
        assert_eq!(list.len(), 2);

        let loaded = core.checkpoint_load(&sid, "CHECK", 1).expect("load");
        assert_eq!(loaded.vectors.know, 0.9);

        let diff = core
            .checkpoint_diff(&sid, "PREFLIGHT", 1, "CHECK", 1)
            .expect("diff");
        assert!((diff.delta.get(crate::vectors::Vector::Know) - 0.3).abs() < 1e-12);

        let err = core.checkpoint_load(&sid, "POSTFLIGHT", 1).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::InsufficientData);

        let err = core.checkpoint_load(&sid, "TAKEOFF", 1).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::InvalidInput);
    }
}
