//! Canonical JSON v1
//!
//! Deterministic serialisation used for signing and checkpoint content
//! hashing: object keys sorted, no insignificant whitespace, UTF-8, floats
//! in shortest round-trip form. Every canonical payload carries a
//! `canon: "v1"` version field.

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::cascade::Phase;
use crate::constants::git::CANON_VERSION;
use crate::types::{Result, SessionId};
use crate::vectors::VectorMap;

/// Recursively sort object keys and serialise compactly.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key escaping delegated to serde_json
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            out.push_str(&serde_json::to_string(scalar).unwrap_or_default());
        }
    }
}

/// SHA-256 of a canonical string, hex-encoded.
pub fn content_hash(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Build the canonical signing payload of one reflex.
///
/// The signed surface is exactly {canon, session_id, phase, round,
/// timestamp, vectors, cascade_trace_hash}; rationale and evidence are
/// auditable through the store but not part of the signature.
pub fn reflex_payload(
    session_id: &SessionId,
    phase: Phase,
    round: u32,
    timestamp: &str,
    vectors: &VectorMap,
    cascade_trace_hash: Option<&str>,
) -> Result<Value> {
    let mut map = Map::new();
    map.insert("canon".to_string(), json!(CANON_VERSION));
    map.insert("session_id".to_string(), json!(session_id.as_str()));
    map.insert("phase".to_string(), json!(phase.as_str()));
    map.insert("round".to_string(), json!(round));
    map.insert("timestamp".to_string(), json!(timestamp));
    map.insert("vectors".to_string(), serde_json::to_value(vectors)?);
    map.insert(
        "cascade_trace_hash".to_string(),
        cascade_trace_hash.map(|h| json!(h)).unwrap_or(Value::Null),
    );
    Ok(Value::Object(map))
}

/// Canonical bytes of a reflex payload, plus their content hash.
pub fn reflex_canonical(
    session_id: &SessionId,
    phase: Phase,
    round: u32,
    timestamp: &str,
    vectors: &VectorMap,
    cascade_trace_hash: Option<&str>,
) -> Result<(String, String)> {
    let payload = reflex_payload(session_id, phase, round, timestamp, vectors, cascade_trace_hash)?;
    let canonical = canonicalize(&payload);
    let hash = content_hash(&canonical);
    Ok((canonical, hash))
}
