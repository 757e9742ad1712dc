//! Checkpoint subcommands.

use serde_json::Value;

use crate::api::Core;
use crate::types::Result;

pub fn create(core: &Core, session: &str, phase: &str, round: u32) -> Result<Value> {
    Ok(serde_json::to_value(core.checkpoint_create(
        session, phase, round,
    )?)?)
}

pub fn load(core: &Core, session: &str, phase: &str, round: u32) -> Result<Value> {
    Ok(serde_json::to_value(core.checkpoint_load(
        session, phase, round,
    )?)?)
}

pub fn list(core: &Core, session: &str) -> Result<Value> {
    Ok(serde_json::json!({ "checkpoints": core.checkpoint_list(session)? }))
}

pub fn diff(
    core: &Core,
    session: &str,
    from_phase: &str,
    from_round: u32,
    to_phase: &str,
    to_round: u32,
) -> Result<Value> {
    Ok(serde_json::to_value(core.checkpoint_diff(
        session, from_phase, from_round, to_phase, to_round,
    )?)?)
}
