//! Reflex submission operations.
//!
//! Each submission resolves its session, validates the payload into the
//! vector model, drives the CASCADE engine, and mirrors the recorded
//! reflex into the checkpoint layer. The call returns only after the
//! SQLite row is durable; the git note is best-effort and reported through
//! `git_deferred`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Core;
use crate::cascade::{
    CascadeEngine, CheckDecision, Phase, ReflexSigner, SubmissionOutcome,
};
use crate::drift::DriftReport;
use crate::resolve::{ActiveTransaction, write_active_transaction};
use crate::signing::{self, Identity, Verification, reflex_canonical};
use crate::store::Reflex;
use crate::types::{
    CascadeId, EmpiricaError, Result, SessionId, TransactionId,
};
use crate::vectors::{GateResult, RecommendedAction, VectorDelta, assessment};

// =============================================================================
// Requests & Responses
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PreflightRequest {
    pub session_id: String,
    #[serde(default)]
    pub cascade_id: Option<String>,
    /// Nested or legacy-flat assessment payload
    pub vectors: Value,
    #[serde(default)]
    pub sign: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub session_id: String,
    #[serde(default)]
    pub cascade_id: Option<String>,
    pub vectors: Value,
    pub decision: String,
    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub remaining_unknowns: Vec<String>,
    #[serde(default)]
    pub sign: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostflightRequest {
    pub session_id: String,
    #[serde(default)]
    pub cascade_id: Option<String>,
    pub vectors: Value,
    /// Grounded evidence records for the praxic calibration track
    #[serde(default)]
    pub evidence: Option<Value>,
    #[serde(default)]
    pub sign: bool,
}

/// The wire response common to all submissions.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub reflex_id: i64,
    pub session_id: String,
    pub transaction_id: String,
    pub phase: Phase,
    pub round: u32,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_result: Option<GateResult>,
    pub recommended_action: RecommendedAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftReport>,
    pub safe_to_proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_delta: Option<VectorDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_update: Option<Vec<crate::drift::CalibrationUpdate>>,
    pub git_deferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_fingerprint: Option<String>,
}

/// Keystore-backed signer handed to the engine.
struct IdentitySigner {
    identity: Identity,
}

impl ReflexSigner for IdentitySigner {
    fn sign_reflex(
        &self,
        session_id: &SessionId,
        phase: Phase,
        round: u32,
        timestamp: &str,
        vectors: &crate::vectors::VectorMap,
        cascade_trace_hash: Option<&str>,
    ) -> Result<Value> {
        let (canonical, _hash) = reflex_canonical(
            session_id,
            phase,
            round,
            timestamp,
            vectors,
            cascade_trace_hash,
        )?;
        let block = signing::sign_with_trace(
            &self.identity,
            &canonical,
            cascade_trace_hash.map(str::to_string),
        );
        Ok(serde_json::to_value(block)?)
    }
}

impl Core {
    /// reflex.submit_preflight
    pub fn submit_preflight(&self, request: &PreflightRequest) -> Result<SubmitResponse> {
        let session_id = self.resolve_session(&request.session_id)?;
        let assessment = assessment::parse_submission(&request.vectors)?;
        let cascade_id = request.cascade_id.clone().map(CascadeId::new);
        let transaction_id = TransactionId::generate();

        let signer = self.signer_for(&session_id, request.sign)?;
        let engine = CascadeEngine::new(self.db(), self.config());
        let outcome = engine.submit_preflight(
            &session_id,
            cascade_id.as_ref(),
            &transaction_id,
            &assessment,
            signer.as_ref().map(|s| s as &dyn ReflexSigner),
        )?;

        // PREFLIGHT opens the transaction; later ambient calls resolve it.
        if let Err(e) = write_active_transaction(
            self.project_root(),
            self.instance(),
            &ActiveTransaction {
                session_id: session_id.as_str().to_string(),
                transaction_id: transaction_id.as_str().to_string(),
                cascade_id: cascade_id.as_ref().map(|c| c.as_str().to_string()),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        ) {
            tracing::warn!("Failed to write open-transaction pointer: {}", e);
        }

        self.finish(&session_id, outcome, None)
    }

    /// reflex.submit_check
    pub fn submit_check(&self, request: &CheckRequest) -> Result<SubmitResponse> {
        let session_id = self.resolve_session(&request.session_id)?;
        let assessment = assessment::parse_submission(&request.vectors)?;
        let decision = CheckDecision::try_parse(&request.decision).ok_or_else(|| {
            EmpiricaError::invalid_field(
                "decision",
                format!(
                    "'{}' is not one of proceed, proceed_with_caution, investigate",
                    request.decision
                ),
            )
        })?;
        let cascade_id = request.cascade_id.clone().map(CascadeId::new);
        let transaction_id = self.open_transaction(&session_id)?;

        let signer = self.signer_for(&session_id, request.sign)?;
        let engine = CascadeEngine::new(self.db(), self.config());
        let outcome = engine.submit_check(
            &session_id,
            cascade_id.as_ref(),
            &transaction_id,
            &assessment,
            decision,
            request.round,
            &request.findings,
            &request.remaining_unknowns,
            signer.as_ref().map(|s| s as &dyn ReflexSigner),
        )?;

        self.finish(&session_id, outcome, None)
    }

    /// reflex.submit_act
    pub fn submit_act(
        &self,
        session_id: &str,
        cascade_id: Option<&str>,
        vectors: &Value,
        sign: bool,
    ) -> Result<SubmitResponse> {
        let session_id = self.resolve_session(session_id)?;
        let assessment = assessment::parse_submission(vectors)?;
        let cascade_id = cascade_id.map(CascadeId::new);
        let transaction_id = self.open_transaction(&session_id)?;

        let signer = self.signer_for(&session_id, sign)?;
        let engine = CascadeEngine::new(self.db(), self.config());
        let outcome = engine.submit_act(
            &session_id,
            cascade_id.as_ref(),
            &transaction_id,
            &assessment,
            signer.as_ref().map(|s| s as &dyn ReflexSigner),
        )?;

        self.finish(&session_id, outcome, None)
    }

    /// reflex.submit_postflight
    pub fn submit_postflight(&self, request: &PostflightRequest) -> Result<SubmitResponse> {
        let session_id = self.resolve_session(&request.session_id)?;
        let parsed = assessment::parse_submission(&request.vectors)?;
        let evidence_records = match &request.evidence {
            Some(value) => assessment::parse_evidence_records(value)?,
            None => Vec::new(),
        };
        let cascade_id = request.cascade_id.clone().map(CascadeId::new);
        let transaction_id = self.open_transaction(&session_id)?;

        let signer = self.signer_for(&session_id, request.sign)?;
        let engine = CascadeEngine::new(self.db(), self.config());
        let outcome = engine.submit_postflight(
            &session_id,
            cascade_id.as_ref(),
            &transaction_id,
            &parsed,
            &evidence_records,
            signer.as_ref().map(|s| s as &dyn ReflexSigner),
        )?;

        // POSTFLIGHT closes the transaction
        if let Err(e) =
            crate::resolve::clear_active_transaction(self.project_root(), self.instance())
        {
            tracing::warn!("Failed to clear open-transaction pointer: {}", e);
        }

        let session = self.db().get_session(&session_id)?;
        let calibration = if evidence_records.is_empty() {
            None
        } else {
            Some(crate::drift::calibration::report(self.db(), &session.ai_id)?.praxic)
        };

        self.finish(&session_id, outcome, calibration)
    }

    /// identity.verify over a stored reflex: recompute the canonical bytes
    /// and check the detached signature against the registered key.
    pub fn verify_reflex(&self, reflex_id: i64) -> Result<Verification> {
        let reflex = self.db().get_reflex(reflex_id)?;
        let signature_value = reflex.signature.clone().ok_or_else(|| {
            EmpiricaError::verification_failed(format!("reflex {} is unsigned", reflex_id))
        })?;
        let block: signing::SignatureBlock = serde_json::from_value(signature_value)
            .map_err(|e| EmpiricaError::verification_failed(format!("corrupt signature block: {}", e)))?;

        let session = self.db().get_session(&reflex.session_id)?;
        let expected = self
            .db()
            .get_identity(&session.ai_id)?
            .map(|identity| identity.fingerprint);

        let (canonical, _hash) = reflex_canonical(
            &reflex.session_id,
            reflex.phase,
            reflex.round,
            &reflex.timestamp,
            &reflex.vectors,
            block.cascade_trace_hash.as_deref(),
        )?;
        signing::verify(&block, &canonical, expected.as_deref())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn signer_for(&self, session_id: &SessionId, sign: bool) -> Result<Option<IdentitySigner>> {
        if !sign {
            return Ok(None);
        }
        let session = self.db().get_session(session_id)?;
        if !self.keystore().has_identity(&session.ai_id) {
            return Err(EmpiricaError::Validation(format!(
                "No identity for {}; run identity.create first",
                session.ai_id
            )));
        }
        let identity = self.keystore().load_identity(&session.ai_id)?;
        // The public key other agents verify against must be registered
        self.db().register_identity(
            &session.ai_id,
            &identity.public_key_b64(),
            &identity.fingerprint(),
        )?;
        Ok(Some(IdentitySigner { identity }))
    }

    /// The transaction a phase submission belongs to, from the pointer file
    /// or the latest open transaction of the session.
    fn open_transaction(&self, session_id: &SessionId) -> Result<TransactionId> {
        if let Some(pointer) =
            crate::resolve::read_active_transaction(self.project_root(), self.instance())?
            && pointer.session_id == session_id.as_str()
        {
            return Ok(TransactionId::new(pointer.transaction_id));
        }

        // Fall back to the newest reflex's transaction
        let reflexes = self.db().list_reflexes(session_id)?;
        reflexes
            .last()
            .map(|r| r.transaction_id.clone())
            .ok_or_else(|| EmpiricaError::IllegalTransition {
                current: "NEW".to_string(),
                attempted: "phase submission without an open transaction".to_string(),
                expected: vec!["reflex.submit_preflight".to_string()],
            })
    }

    fn finish(
        &self,
        session_id: &SessionId,
        outcome: SubmissionOutcome,
        calibration: Option<Vec<crate::drift::CalibrationUpdate>>,
    ) -> Result<SubmitResponse> {
        let reflex = match &outcome.reflex {
            Some(reflex) => reflex.clone(),
            None => self.db().get_reflex(outcome.reflex_id)?,
        };
        let git_deferred = self.mirror(&reflex);
        let signed_fingerprint = reflex
            .signature
            .as_ref()
            .and_then(|s| s.get("fingerprint"))
            .and_then(|f| f.as_str())
            .map(str::to_string);

        Ok(SubmitResponse {
            reflex_id: outcome.reflex_id,
            session_id: session_id.as_str().to_string(),
            transaction_id: outcome.transaction_id.as_str().to_string(),
            phase: outcome.phase,
            round: outcome.round,
            confidence: outcome.confidence,
            gate_result: outcome.gate_result,
            recommended_action: outcome.recommended_action,
            drift: outcome.drift,
            safe_to_proceed: outcome.safe_to_proceed,
            learning_delta: outcome.learning_delta,
            calibration_update: calibration,
            git_deferred,
            signed_fingerprint,
        })
    }

    fn mirror(&self, reflex: &Reflex) -> bool {
        match self.checkpoints().mirror_reflex(reflex) {
            Ok(outcome) => outcome.git_deferred,
            Err(e) => {
                tracing::warn!("Checkpoint mirror failed for reflex {}: {}", reflex.id, e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::session_ops::SessionCreateRequest;
    use crate::api::test_support::core;
    use serde_json::json;

    fn flat_vectors(overrides: &[(&str, f64)]) -> Value {
        let mut payload = json!({
            "know": 0.6, "do": 0.7, "context": 0.75,
            "clarity": 0.7, "coherence": 0.8, "signal": 0.7, "density": 0.4,
            "state": 0.6, "change": 0.2, "completion": 0.0, "impact": 0.5,
            "engagement": 0.8, "uncertainty": 0.4,
            "reasoning": "initial"
        });
        for (key, value) in overrides {
            payload[key] = json!(value);
        }
        payload
    }

    fn session(core: &Core, ai: &str) -> String {
        core.session_create(&SessionCreateRequest {
            ai_id: ai.to_string(),
            bootstrap_level: 0,
            project_id: None,
            subject: None,
            user_id: None,
        })
        .expect("session")
        .session_id
    }

    #[test]
    fn test_happy_path_end_to_end() {
        let (_dir, core) = core();
        let sid = session(&core, "agent-A");

        let pre = core
            .submit_preflight(&PreflightRequest {
                session_id: sid.clone(),
                cascade_id: None,
                vectors: flat_vectors(&[]),
                sign: false,
            })
            .expect("preflight");
        assert_eq!(pre.phase, Phase::Preflight);
        assert!(pre.gate_result.as_ref().unwrap().passed);
        // In-memory core has git disabled: mirrors defer
        assert!(pre.git_deferred);

        let check = core
            .submit_check(&CheckRequest {
                session_id: sid.clone(),
                cascade_id: None,
                vectors: flat_vectors(&[("know", 0.8), ("uncertainty", 0.25)]),
                decision: "proceed".to_string(),
                round: None,
                findings: vec![],
                remaining_unknowns: vec![],
                sign: false,
            })
            .expect("check");
        assert_eq!(check.round, 1);
        assert_eq!(check.transaction_id, pre.transaction_id);

        let post = core
            .submit_postflight(&PostflightRequest {
                session_id: sid.clone(),
                cascade_id: None,
                vectors: flat_vectors(&[
                    ("know", 0.9),
                    ("completion", 1.0),
                    ("uncertainty", 0.15),
                ]),
                evidence: None,
                sign: false,
            })
            .expect("postflight");

        let delta = post.learning_delta.expect("delta");
        assert!((delta.get(crate::vectors::Vector::Know) - 0.30).abs() < 1e-12);
        assert!((delta.get(crate::vectors::Vector::Uncertainty) + 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_decision_rejected() {
        let (_dir, core) = core();
        let sid = session(&core, "agent-A");
        core.submit_preflight(&PreflightRequest {
            session_id: sid.clone(),
            cascade_id: None,
            vectors: flat_vectors(&[]),
            sign: false,
        })
        .expect("preflight");

        let err = core
            .submit_check(&CheckRequest {
                session_id: sid,
                cascade_id: None,
                vectors: flat_vectors(&[]),
                decision: "yolo".to_string(),
                round: None,
                findings: vec![],
                remaining_unknowns: vec![],
                sign: false,
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_postflight_without_preflight_is_illegal() {
        let (_dir, core) = core();
        let sid = session(&core, "agent-A");

        let err = core
            .submit_postflight(&PostflightRequest {
                session_id: sid,
                cascade_id: None,
                vectors: flat_vectors(&[]),
                evidence: None,
                sign: false,
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::IllegalTransition);
    }

    #[test]
    fn test_sign_and_verify_roundtrip_with_tamper() {
        let (_dir, core) = core();
        let sid = session(&core, "auditor");
        core.keystore()
            .create_identity(&crate::types::AiId::new("auditor"), false)
            .expect("identity");

        let pre = core
            .submit_preflight(&PreflightRequest {
                session_id: sid.clone(),
                cascade_id: None,
                vectors: flat_vectors(&[]),
                sign: true,
            })
            .expect("signed preflight");
        let fingerprint = pre.signed_fingerprint.expect("fingerprint");

        let verification = core.verify_reflex(pre.reflex_id).expect("verify");
        assert_eq!(verification.fingerprint, fingerprint);

        // Flip one stored vector bit and re-verify
        core.db()
            .conn()
            .unwrap()
            .execute(
                "UPDATE reflexes SET know = know + 0.000001 WHERE id = ?1",
                rusqlite::params![pre.reflex_id],
            )
            .expect("tamper");
        let err = core.verify_reflex(pre.reflex_id).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::VerificationFailed);
    }

    #[test]
    fn test_sign_without_identity_is_actionable() {
        let (_dir, core) = core();
        let sid = session(&core, "agent-A");
        let err = core
            .submit_preflight(&PreflightRequest {
                session_id: sid,
                cascade_id: None,
                vectors: flat_vectors(&[]),
                sign: true,
            })
            .unwrap_err();
        assert!(err.to_string().contains("identity.create"));
    }

    #[test]
    fn test_postflight_evidence_reports_calibration() {
        let (_dir, core) = core();
        let sid = session(&core, "agent-A");
        core.submit_preflight(&PreflightRequest {
            session_id: sid.clone(),
            cascade_id: None,
            vectors: flat_vectors(&[]),
            sign: false,
        })
        .expect("preflight");
        core.submit_check(&CheckRequest {
            session_id: sid.clone(),
            cascade_id: None,
            vectors: flat_vectors(&[]),
            decision: "proceed".to_string(),
            round: None,
            findings: vec![],
            remaining_unknowns: vec![],
            sign: false,
        })
        .expect("check");

        let post = core
            .submit_postflight(&PostflightRequest {
                session_id: sid,
                cascade_id: None,
                vectors: flat_vectors(&[("completion", 0.9)]),
                evidence: Some(json!([
                    { "metric": "tests_passed", "normalised_value": 0.5,
                      "supports_vectors": ["completion"], "quality": 0.9 }
                ])),
                sign: false,
            })
            .expect("postflight");

        let updates = post.calibration_update.expect("calibration");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].vector, "completion");
        // self 0.9 vs grounded 0.5: positive gap on the praxic track
        assert!(updates[0].gap > 0.0);
    }
}
