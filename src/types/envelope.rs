//! Response Envelope
//!
//! Every externally observable operation returns either
//! `{ok: true, ...payload}` or
//! `{ok: false, error_type, reason, suggestion?, recovery_commands?, context?}`.
//! The CLI and tool-routing layers print the envelope verbatim on stdout.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::types::error::EmpiricaError;

/// Wrap a successful payload into the wire envelope.
///
/// The payload's own fields are flattened next to `ok`; a non-object payload
/// (rare) lands under `result`.
pub fn success<T: Serialize>(payload: &T) -> Value {
    let value = serde_json::to_value(payload).unwrap_or(Value::Null);
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len() + 1);
            out.insert("ok".to_string(), Value::Bool(true));
            out.extend(map);
            Value::Object(out)
        }
        Value::Null => json!({ "ok": true }),
        other => json!({ "ok": true, "result": other }),
    }
}

/// Render an error into the wire envelope.
pub fn failure(err: &EmpiricaError) -> Value {
    let mut out = Map::new();
    out.insert("ok".to_string(), Value::Bool(false));
    out.insert(
        "error_type".to_string(),
        Value::String(err.kind().as_str().to_string()),
    );
    out.insert("reason".to_string(), Value::String(err.to_string()));

    if let Some(suggestion) = err.suggestion() {
        out.insert("suggestion".to_string(), Value::String(suggestion));
    }
    let recovery = err.recovery_commands();
    if !recovery.is_empty() {
        out.insert(
            "recovery_commands".to_string(),
            Value::Array(recovery.into_iter().map(Value::String).collect()),
        );
    }
    if let Some(context) = error_context(err) {
        out.insert("context".to_string(), context);
    }

    Value::Object(out)
}

/// Structured context for errors that carry state beyond the message.
fn error_context(err: &EmpiricaError) -> Option<Value> {
    match err {
        EmpiricaError::IllegalTransition {
            current, attempted, ..
        } => Some(json!({ "current_phase": current, "attempted": attempted })),
        EmpiricaError::SevereDrift { magnitude } => {
            Some(json!({ "drift_magnitude": magnitude, "safe_to_proceed": false }))
        }
        EmpiricaError::InvalidInput {
            field: Some(field), ..
        } => Some(json!({ "field": field })),
        EmpiricaError::InsufficientData { have, needed, .. } => {
            Some(json!({ "have": have, "needed": needed }))
        }
        _ => None,
    }
}

/// Convert an operation result into the envelope form.
pub fn from_result<T: Serialize>(result: &crate::types::Result<T>) -> Value {
    match result {
        Ok(payload) => success(payload),
        Err(err) => failure(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Payload {
        session_id: String,
        round: u32,
    }

    #[test]
    fn test_success_flattens_payload() {
        let env = success(&Payload {
            session_id: "abc".to_string(),
            round: 2,
        });
        assert_eq!(env["ok"], true);
        assert_eq!(env["session_id"], "abc");
        assert_eq!(env["round"], 2);
    }

    #[test]
    fn test_failure_carries_taxonomy() {
        let err = EmpiricaError::IllegalTransition {
            current: "NEW".to_string(),
            attempted: "reflex.submit_postflight".to_string(),
            expected: vec!["reflex.submit_preflight".to_string()],
        };
        let env = failure(&err);
        assert_eq!(env["ok"], false);
        assert_eq!(env["error_type"], "illegal_transition");
        assert_eq!(env["context"]["current_phase"], "NEW");
        assert_eq!(env["recovery_commands"][0], "reflex.submit_preflight");
    }

    #[test]
    fn test_severe_drift_context() {
        let env = failure(&EmpiricaError::SevereDrift { magnitude: 0.7 });
        assert_eq!(env["error_type"], "severe_drift");
        assert_eq!(env["context"]["safe_to_proceed"], false);
    }
}
