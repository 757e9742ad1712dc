//! Assessment Validator
//!
//! Normalises submitted assessment payloads into the typed [`Assessment`]
//! value the rest of the engine consumes. Two accepted forms:
//!
//! - **Nested** (canonical): five top-level groups (`engagement`,
//!   `foundation`, `comprehension`, `execution`, `uncertainty`), each vector
//!   carrying `{score, rationale, evidence?}`.
//! - **Legacy flat**: a flat score map plus one `reasoning` string. Accepted
//!   for backward compatibility with a warning; produces an identical stored
//!   reflex.
//!
//! Rationale is mandatory. An empty rationale is rejected to prevent vacuous
//! assessments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{Vector, VectorMap};
use crate::types::{EmpiricaError, Result};

/// A validated, normalised self-assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub vectors: VectorMap,
    /// Per-vector rationales (flat form yields a single `all` entry)
    pub rationales: BTreeMap<String, String>,
    /// Combined free-form rationale as stored on the reflex row
    pub reasoning: String,
    /// Opaque supporting evidence, keyed by vector where supplied
    pub evidence: Option<Value>,
}

/// One externally grounded measurement supplied at POSTFLIGHT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Name of the grounded metric, e.g. `tests_passed`
    pub metric: String,
    /// Metric value normalised into [0, 1]
    pub normalised_value: f64,
    /// Vector names this measurement grounds
    pub supports_vectors: Vec<String>,
    /// Source quality in [0, 1]; weights the calibration update
    pub quality: f64,
}

impl EvidenceRecord {
    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(EmpiricaError::invalid_field("metric", "must not be empty"));
        }
        for (name, value) in [
            ("normalised_value", self.normalised_value),
            ("quality", self.quality),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EmpiricaError::invalid_field(
                    name,
                    format!("{} outside [0, 1]", value),
                ));
            }
        }
        for vector in &self.supports_vectors {
            if Vector::try_parse(vector).is_none() {
                return Err(EmpiricaError::invalid_field(
                    "supports_vectors",
                    format!("unknown vector '{}'", vector),
                ));
            }
        }
        Ok(())
    }
}

/// Parse a list of evidence records, validating each.
pub fn parse_evidence_records(value: &Value) -> Result<Vec<EvidenceRecord>> {
    let records: Vec<EvidenceRecord> = serde_json::from_value(value.clone())
        .map_err(|e| EmpiricaError::invalid_field("evidence", format!("malformed: {}", e)))?;
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}

// =============================================================================
// Submission Parsing
// =============================================================================

const GROUP_KEYS: [&str; 5] = [
    "engagement",
    "foundation",
    "comprehension",
    "execution",
    "uncertainty",
];

/// Parse a submitted payload in either accepted form.
pub fn parse_submission(payload: &Value) -> Result<Assessment> {
    let object = payload
        .as_object()
        .ok_or_else(|| EmpiricaError::invalid_input("assessment payload must be a JSON object"))?;

    if GROUP_KEYS.iter().all(|k| object.contains_key(*k)) {
        parse_nested(payload)
    } else if Vector::ALL
        .iter()
        .any(|v| object.get(v.as_str()).map(Value::is_number) == Some(true))
    {
        warn!("Accepting legacy flat assessment form; prefer the nested form");
        parse_flat(payload)
    } else {
        Err(EmpiricaError::invalid_input(
            "assessment must be nested (engagement/foundation/comprehension/execution/uncertainty) \
             or the legacy flat score map",
        ))
    }
}

fn group_vectors(group: &str) -> &'static [Vector] {
    match group {
        "foundation" => &[Vector::Know, Vector::Do, Vector::Context],
        "comprehension" => &[
            Vector::Clarity,
            Vector::Coherence,
            Vector::Signal,
            Vector::Density,
        ],
        "execution" => &[
            Vector::State,
            Vector::Change,
            Vector::Completion,
            Vector::Impact,
        ],
        "engagement" => &[Vector::Engagement],
        "uncertainty" => &[Vector::Uncertainty],
        _ => &[],
    }
}

fn parse_nested(payload: &Value) -> Result<Assessment> {
    let mut vectors = VectorMap {
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
    };
    let mut rationales = BTreeMap::new();
    let mut evidence = serde_json::Map::new();

    for group in GROUP_KEYS {
        let group_value = &payload[group];
        let members = group_vectors(group);

        for vector in members {
            // Single-vector groups may carry {score, rationale} directly.
            let entry = if members.len() == 1 && group_value.get("score").is_some() {
                group_value
            } else {
                group_value.get(vector.as_str()).ok_or_else(|| {
                    EmpiricaError::invalid_field(
                        vector.as_str(),
                        format!("missing from '{}' group", group),
                    )
                })?
            };

            let score = entry
                .get("score")
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    EmpiricaError::invalid_field(vector.as_str(), "missing numeric 'score'")
                })?;
            vectors.set(*vector, score);

            let rationale = entry
                .get("rationale")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    EmpiricaError::invalid_field(vector.as_str(), "missing 'rationale'")
                })?;
            if rationale.trim().is_empty() {
                return Err(EmpiricaError::invalid_field(
                    vector.as_str(),
                    "rationale must not be empty",
                ));
            }
            rationales.insert(vector.as_str().to_string(), rationale.to_string());

            if let Some(item) = entry.get("evidence") {
                evidence.insert(vector.as_str().to_string(), item.clone());
            }
        }
    }

    vectors.validate()?;

    let reasoning = rationales
        .iter()
        .map(|(vector, rationale)| format!("{}: {}", vector, rationale))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(Assessment {
        vectors,
        rationales,
        reasoning,
        evidence: if evidence.is_empty() {
            None
        } else {
            Some(Value::Object(evidence))
        },
    })
}

fn parse_flat(payload: &Value) -> Result<Assessment> {
    let mut vectors = VectorMap {
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
    };

    for vector in Vector::ALL {
        let score = payload
            .get(vector.as_str())
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                EmpiricaError::invalid_field(vector.as_str(), "missing from flat score map")
            })?;
        vectors.set(vector, score);
    }
    vectors.validate()?;

    let reasoning = payload
        .get("reasoning")
        .and_then(Value::as_str)
        .ok_or_else(|| EmpiricaError::invalid_field("reasoning", "missing"))?;
    if reasoning.trim().is_empty() {
        return Err(EmpiricaError::invalid_field(
            "reasoning",
            "rationale must not be empty",
        ));
    }

    let mut rationales = BTreeMap::new();
    rationales.insert("all".to_string(), reasoning.to_string());

    Ok(Assessment {
        vectors,
        rationales,
        reasoning: reasoning.to_string(),
        evidence: payload.get("evidence").cloned(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested_payload() -> Value {
        json!({
            "engagement": { "score": 0.8, "rationale": "fresh task" },
            "foundation": {
                "know": { "score": 0.6, "rationale": "read the spec" },
                "do": { "score": 0.7, "rationale": "done similar work" },
                "context": { "score": 0.75, "rationale": "repo is familiar" }
            },
            "comprehension": {
                "clarity": { "score": 0.7, "rationale": "goal is clear" },
                "coherence": { "score": 0.8, "rationale": "no contradictions" },
                "signal": { "score": 0.7, "rationale": "good docs" },
                "density": { "score": 0.4, "rationale": "large surface" }
            },
            "execution": {
                "state": { "score": 0.6, "rationale": "clean tree" },
                "change": { "score": 0.2, "rationale": "nothing changed yet" },
                "completion": { "score": 0.0, "rationale": "starting" },
                "impact": { "score": 0.5, "rationale": "moderate blast radius" }
            },
            "uncertainty": { "score": 0.4, "rationale": "unknowns in the API layer",
                             "evidence": { "files": ["api.rs"] } }
        })
    }

    #[test]
    fn test_nested_parses() {
        let assessment = parse_submission(&nested_payload()).expect("parse");
        assert_eq!(assessment.vectors.know, 0.6);
        assert_eq!(assessment.vectors.engagement, 0.8);
        assert_eq!(assessment.vectors.uncertainty, 0.4);
        assert_eq!(assessment.rationales.len(), 13);
        assert!(assessment.reasoning.contains("know: read the spec"));
        let evidence = assessment.evidence.expect("evidence");
        assert_eq!(evidence["uncertainty"]["files"][0], "api.rs");
    }

    #[test]
    fn test_nested_missing_vector_rejected() {
        let mut payload = nested_payload();
        payload["foundation"]
            .as_object_mut()
            .unwrap()
            .remove("context");
        let err = parse_submission(&payload).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_nested_empty_rationale_rejected() {
        let mut payload = nested_payload();
        payload["foundation"]["know"]["rationale"] = json!("   ");
        assert!(parse_submission(&payload).is_err());
    }

    #[test]
    fn test_nested_out_of_range_rejected() {
        let mut payload = nested_payload();
        payload["foundation"]["know"]["score"] = json!(1.01);
        assert!(parse_submission(&payload).is_err());

        payload["foundation"]["know"]["score"] = json!(1.0);
        assert!(parse_submission(&payload).is_ok());
    }

    #[test]
    fn test_flat_form_accepted() {
        let payload = json!({
            "know": 0.6, "do": 0.7, "context": 0.75,
            "clarity": 0.7, "coherence": 0.8, "signal": 0.7, "density": 0.4,
            "state": 0.6, "change": 0.2, "completion": 0.0, "impact": 0.5,
            "engagement": 0.8, "uncertainty": 0.4,
            "reasoning": "initial"
        });
        let assessment = parse_submission(&payload).expect("parse");
        assert_eq!(assessment.reasoning, "initial");
        assert_eq!(assessment.vectors.density, 0.4);
    }

    #[test]
    fn test_flat_form_requires_reasoning() {
        let payload = json!({
            "know": 0.6, "do": 0.7, "context": 0.75,
            "clarity": 0.7, "coherence": 0.8, "signal": 0.7, "density": 0.4,
            "state": 0.6, "change": 0.2, "completion": 0.0, "impact": 0.5,
            "engagement": 0.8, "uncertainty": 0.4,
            "reasoning": ""
        });
        assert!(parse_submission(&payload).is_err());
    }

    #[test]
    fn test_unrecognised_shape_rejected() {
        assert!(parse_submission(&json!({"confidence": 0.9})).is_err());
        assert!(parse_submission(&json!("not an object")).is_err());
    }

    #[test]
    fn test_evidence_records() {
        let records = parse_evidence_records(&json!([
            { "metric": "tests_passed", "normalised_value": 0.9,
              "supports_vectors": ["completion", "know"], "quality": 0.8 }
        ]))
        .expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, "tests_passed");

        let bad = parse_evidence_records(&json!([
            { "metric": "tests_passed", "normalised_value": 1.5,
              "supports_vectors": ["completion"], "quality": 0.8 }
        ]));
        assert!(bad.is_err());

        let unknown = parse_evidence_records(&json!([
            { "metric": "tests_passed", "normalised_value": 0.5,
              "supports_vectors": ["velocity"], "quality": 0.8 }
        ]));
        assert!(unknown.is_err());
    }
}
