//! Session subcommands.

use serde_json::Value;

use crate::api::session_ops::{ResumeMode, SessionCreateRequest};
use crate::api::Core;
use crate::types::Result;

pub struct CreateArgs {
    pub ai_id: String,
    pub bootstrap_level: i64,
    pub project_id: Option<String>,
    pub subject: Option<String>,
    pub user_id: Option<String>,
}

pub fn create(core: &Core, args: CreateArgs) -> Result<Value> {
    let response = core.session_create(&SessionCreateRequest {
        ai_id: args.ai_id,
        bootstrap_level: args.bootstrap_level,
        project_id: args.project_id,
        subject: args.subject,
        user_id: args.user_id,
    })?;
    Ok(serde_json::to_value(response)?)
}

pub fn get(core: &Core, id_or_alias: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.session_get(id_or_alias)?)?)
}

pub fn end(core: &Core, id_or_alias: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.session_end(id_or_alias)?)?)
}

pub fn list(core: &Core, ai_id: Option<&str>, active: bool, limit: usize) -> Result<Value> {
    let sessions = core.session_list(ai_id, active, limit)?;
    Ok(serde_json::json!({ "sessions": sessions }))
}

pub fn resume(
    core: &Core,
    ai_id: &str,
    last_n: Option<usize>,
    session: Option<&str>,
    full: bool,
) -> Result<Value> {
    let mode = match (session, last_n) {
        (Some(id), _) => ResumeMode::SessionId(id.to_string()),
        (None, Some(n)) => ResumeMode::LastN(n),
        (None, None) => ResumeMode::Last,
    };
    Ok(serde_json::to_value(core.session_resume(ai_id, mode, full)?)?)
}

pub fn handoff(
    core: &Core,
    session: &str,
    summary: &str,
    next_steps: Option<&str>,
) -> Result<Value> {
    let id = core.session_handoff(session, summary, next_steps)?;
    Ok(serde_json::json!({ "handoff_id": id }))
}

pub fn cascade_create(
    core: &Core,
    session: &str,
    task: &str,
    context: Option<&str>,
    goal_id: Option<&str>,
) -> Result<Value> {
    let session_id = core.resolve_session(session)?;
    let context: Option<Value> = context
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| {
            crate::types::EmpiricaError::invalid_field("context", format!("malformed JSON: {}", e))
        })?;
    let cascade = core.db().create_cascade(
        &session_id,
        task,
        context.as_ref(),
        goal_id.map(crate::types::GoalId::new).as_ref(),
    )?;
    Ok(serde_json::to_value(cascade)?)
}
