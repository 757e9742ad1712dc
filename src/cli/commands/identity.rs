//! Identity subcommands.

use serde_json::Value;

use crate::api::Core;
use crate::types::Result;

pub fn create(core: &Core, ai_id: &str, overwrite: bool) -> Result<Value> {
    Ok(serde_json::to_value(core.identity_create(ai_id, overwrite)?)?)
}

pub fn list(core: &Core) -> Result<Value> {
    Ok(serde_json::json!({ "identities": core.identity_list()? }))
}

pub fn export(core: &Core, ai_id: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.identity_export(ai_id)?)?)
}

pub fn verify(core: &Core, reflex_id: i64) -> Result<Value> {
    Ok(serde_json::to_value(core.verify_reflex(reflex_id)?)?)
}
