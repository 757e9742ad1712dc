//! Project subcommands.

use serde_json::Value;

use crate::api::Core;
use crate::types::Result;

pub fn create(core: &Core, name: &str, repos: Vec<String>) -> Result<Value> {
    Ok(serde_json::to_value(core.project_create(name, &repos)?)?)
}

pub fn get(core: &Core, id_or_name: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.project_get(id_or_name)?)?)
}

pub fn list(core: &Core, status: Option<&str>) -> Result<Value> {
    Ok(serde_json::json!({ "projects": core.project_list(status)? }))
}

pub fn set_status(core: &Core, id_or_name: &str, status: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.project_set_status(id_or_name, status)?)?)
}
