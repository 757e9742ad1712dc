//! Goal subcommands.

use serde_json::Value;

use crate::api::Core;
use crate::api::goal_ops::GoalCreateRequest;
use crate::types::Result;

#[allow(clippy::too_many_arguments)]
pub fn create(
    core: &Core,
    session: &str,
    objective: &str,
    breadth: f64,
    duration: f64,
    coordination: f64,
    complexity: Option<f64>,
) -> Result<Value> {
    let goal = core.goal_create(&GoalCreateRequest {
        session_id: session.to_string(),
        objective: objective.to_string(),
        scope: (breadth, duration, coordination),
        estimated_complexity: complexity,
    })?;
    Ok(serde_json::to_value(goal)?)
}

pub fn add_subtask(
    core: &Core,
    goal_id: &str,
    description: &str,
    importance: &str,
) -> Result<Value> {
    Ok(serde_json::to_value(core.goal_add_subtask(
        goal_id,
        description,
        importance,
    )?)?)
}

pub fn complete_subtask(core: &Core, subtask_id: &str, evidence: Option<&str>) -> Result<Value> {
    Ok(serde_json::to_value(
        core.goal_complete_subtask(subtask_id, evidence)?,
    )?)
}

pub fn progress(core: &Core, goal_id: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.goal_progress(goal_id)?)?)
}

pub fn list(core: &Core, session: Option<&str>) -> Result<Value> {
    Ok(serde_json::json!({ "goals": core.goal_list(session)? }))
}

pub fn claim(core: &Core, goal_id: &str, ai_id: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.goal_claim(goal_id, ai_id)?)?)
}

pub fn complete(core: &Core, goal_id: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.goal_complete(goal_id)?)?)
}
