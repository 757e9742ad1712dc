//! Breadcrumb operations.

use serde::Deserialize;

use super::Core;
use crate::store::{Breadcrumb, BreadcrumbKind, BreadcrumbLinks};
use crate::types::{EmpiricaError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct BreadcrumbLogRequest {
    pub session_id: String,
    /// finding | unknown | dead_end | mistake
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(flatten)]
    pub links: BreadcrumbLinks,
}

impl Core {
    /// breadcrumb.{finding,unknown,dead_end,mistake}.log
    pub fn breadcrumb_log(&self, request: &BreadcrumbLogRequest) -> Result<Breadcrumb> {
        let kind = BreadcrumbKind::try_parse(&request.kind).ok_or_else(|| {
            EmpiricaError::invalid_field(
                "kind",
                format!(
                    "'{}' is not one of finding, unknown, dead_end, mistake",
                    request.kind
                ),
            )
        })?;
        let session_id = self.resolve_session(&request.session_id)?;
        self.db().log_breadcrumb(
            kind,
            &session_id,
            &request.content,
            request.context.as_deref(),
            request.links.clone(),
        )
    }

    /// breadcrumb.query
    pub fn breadcrumb_query(
        &self,
        session_id: &str,
        kind: Option<&str>,
        unresolved_only: bool,
        limit: usize,
    ) -> Result<Vec<Breadcrumb>> {
        let kind = kind
            .map(|k| {
                BreadcrumbKind::try_parse(k).ok_or_else(|| {
                    EmpiricaError::invalid_field("kind", format!("unknown kind '{}'", k))
                })
            })
            .transpose()?;
        let session_id = self.resolve_session(session_id)?;
        self.db()
            .query_breadcrumbs(&session_id, kind, unresolved_only, limit)
    }

    /// breadcrumb.resolve (unknowns only)
    pub fn breadcrumb_resolve(&self, id: i64, resolver: &str) -> Result<Breadcrumb> {
        self.db().resolve_unknown(id, resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::session_ops::SessionCreateRequest;
    use crate::api::test_support::core;

    #[test]
    fn test_log_query_resolve() {
        let (_dir, core) = core();
        core.session_create(&SessionCreateRequest {
            ai_id: "agent-A".to_string(),
            bootstrap_level: 0,
            project_id: None,
            subject: None,
            user_id: None,
        })
        .expect("session");

        let unknown = core
            .breadcrumb_log(&BreadcrumbLogRequest {
                session_id: "latest".to_string(),
                kind: "unknown".to_string(),
                content: "is the cache coherent?".to_string(),
                context: None,
                links: BreadcrumbLinks::default(),
            })
            .expect("log");

        let open = core
            .breadcrumb_query("latest", Some("unknown"), true, 10)
            .expect("query");
        assert_eq!(open.len(), 1);

        core.breadcrumb_resolve(unknown.id, "agent-B").expect("resolve");
        let open = core
            .breadcrumb_query("latest", Some("unknown"), true, 10)
            .expect("query");
        assert!(open.is_empty());

        let err = core
            .breadcrumb_log(&BreadcrumbLogRequest {
                session_id: "latest".to_string(),
                kind: "rumor".to_string(),
                content: "x".to_string(),
                context: None,
                links: BreadcrumbLinks::default(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::InvalidInput);
    }
}
