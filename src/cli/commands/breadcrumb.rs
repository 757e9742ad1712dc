//! Breadcrumb subcommands.

use serde_json::Value;

use crate::api::Core;
use crate::api::breadcrumb_ops::BreadcrumbLogRequest;
use crate::store::BreadcrumbLinks;
use crate::types::Result;

#[allow(clippy::too_many_arguments)]
pub fn log(
    core: &Core,
    session: &str,
    kind: &str,
    content: &str,
    context: Option<&str>,
    goal_id: Option<&str>,
    subtask_id: Option<&str>,
    transaction_id: Option<&str>,
) -> Result<Value> {
    let crumb = core.breadcrumb_log(&BreadcrumbLogRequest {
        session_id: session.to_string(),
        kind: kind.to_string(),
        content: content.to_string(),
        context: context.map(str::to_string),
        links: BreadcrumbLinks {
            goal_id: goal_id.map(str::to_string),
            subtask_id: subtask_id.map(str::to_string),
            project_id: None,
            transaction_id: transaction_id.map(str::to_string),
        },
    })?;
    Ok(serde_json::to_value(crumb)?)
}

pub fn query(
    core: &Core,
    session: &str,
    kind: Option<&str>,
    unresolved: bool,
    limit: usize,
) -> Result<Value> {
    let crumbs = core.breadcrumb_query(session, kind, unresolved, limit)?;
    Ok(serde_json::json!({ "breadcrumbs": crumbs }))
}

pub fn resolve(core: &Core, id: i64, resolver: &str) -> Result<Value> {
    Ok(serde_json::to_value(core.breadcrumb_resolve(id, resolver)?)?)
}
