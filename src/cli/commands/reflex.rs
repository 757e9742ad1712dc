//! Reflex submission subcommands.

use serde_json::Value;

use crate::api::Core;
use crate::api::reflex_ops::{CheckRequest, PostflightRequest, PreflightRequest};
use crate::cli::read_payload;
use crate::types::Result;

pub fn preflight(
    core: &Core,
    session: &str,
    cascade: Option<&str>,
    sign: bool,
    payload: Option<&str>,
) -> Result<Value> {
    let response = core.submit_preflight(&PreflightRequest {
        session_id: session.to_string(),
        cascade_id: cascade.map(str::to_string),
        vectors: read_payload(payload)?,
        sign,
    })?;
    Ok(serde_json::to_value(response)?)
}

#[allow(clippy::too_many_arguments)]
pub fn check(
    core: &Core,
    session: &str,
    cascade: Option<&str>,
    decision: &str,
    round: Option<u32>,
    findings: Vec<String>,
    unknowns: Vec<String>,
    sign: bool,
    payload: Option<&str>,
) -> Result<Value> {
    let response = core.submit_check(&CheckRequest {
        session_id: session.to_string(),
        cascade_id: cascade.map(str::to_string),
        vectors: read_payload(payload)?,
        decision: decision.to_string(),
        round,
        findings,
        remaining_unknowns: unknowns,
        sign,
    })?;
    Ok(serde_json::to_value(response)?)
}

pub fn act(
    core: &Core,
    session: &str,
    cascade: Option<&str>,
    sign: bool,
    payload: Option<&str>,
) -> Result<Value> {
    let response = core.submit_act(session, cascade, &read_payload(payload)?, sign)?;
    Ok(serde_json::to_value(response)?)
}

pub fn postflight(
    core: &Core,
    session: &str,
    cascade: Option<&str>,
    evidence: Option<&str>,
    sign: bool,
    payload: Option<&str>,
) -> Result<Value> {
    let evidence = evidence
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| {
            crate::types::EmpiricaError::invalid_field("evidence", format!("malformed JSON: {}", e))
        })?;
    let response = core.submit_postflight(&PostflightRequest {
        session_id: session.to_string(),
        cascade_id: cascade.map(str::to_string),
        vectors: read_payload(payload)?,
        evidence,
        sign,
    })?;
    Ok(serde_json::to_value(response)?)
}
