//! Breadcrumb repository.
//!
//! Findings, unknowns, dead ends, and mistakes: append-only narrative
//! records attached to a session. An unknown carries a mutable
//! `is_resolved` flag; once resolved, the record is immutable.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::types::{EmpiricaError, Result, ResultExt, SessionId, log_filter_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreadcrumbKind {
    Finding,
    Unknown,
    DeadEnd,
    Mistake,
}

impl BreadcrumbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finding => "finding",
            Self::Unknown => "unknown",
            Self::DeadEnd => "dead_end",
            Self::Mistake => "mistake",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "finding" => Some(Self::Finding),
            "unknown" => Some(Self::Unknown),
            "dead_end" => Some(Self::DeadEnd),
            "mistake" => Some(Self::Mistake),
            _ => None,
        }
    }
}

/// Optional attachment points beyond the owning session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreadcrumbLinks {
    pub goal_id: Option<String>,
    pub subtask_id: Option<String>,
    pub project_id: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub id: i64,
    pub kind: BreadcrumbKind,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub links: BreadcrumbLinks,
    pub content: String,
    pub context: Option<String>,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
    pub created_at: String,
}

impl Breadcrumb {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(1)?;
        Ok(Breadcrumb {
            id: row.get(0)?,
            kind: BreadcrumbKind::try_parse(&kind_str).unwrap_or(BreadcrumbKind::Finding),
            session_id: SessionId::new(row.get::<_, String>(2)?),
            links: BreadcrumbLinks {
                goal_id: row.get(3)?,
                subtask_id: row.get(4)?,
                project_id: row.get(5)?,
                transaction_id: row.get(6)?,
            },
            content: row.get(7)?,
            context: row.get(8)?,
            is_resolved: row.get::<_, i64>(9)? != 0,
            resolved_by: row.get(10)?,
            resolved_at: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

const BREADCRUMB_COLUMNS: &str = "id, kind, session_id, goal_id, subtask_id, project_id, \
                                  transaction_id, content, context, is_resolved, resolved_by, \
                                  resolved_at, created_at";

impl Database {
    /// Append a breadcrumb.
    pub fn log_breadcrumb(
        &self,
        kind: BreadcrumbKind,
        session_id: &SessionId,
        content: &str,
        context: Option<&str>,
        links: BreadcrumbLinks,
    ) -> Result<Breadcrumb> {
        if content.trim().is_empty() {
            return Err(EmpiricaError::invalid_field("content", "must not be empty"));
        }
        self.get_session(session_id)?;

        let created_at = now_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO breadcrumbs (kind, session_id, goal_id, subtask_id, project_id, \
             transaction_id, content, context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                kind.as_str(),
                session_id.as_str(),
                links.goal_id,
                links.subtask_id,
                links.project_id,
                links.transaction_id,
                content,
                context,
                created_at,
            ],
        )
        .with_context("Failed to insert breadcrumb")?;

        let id = conn.last_insert_rowid();
        Ok(Breadcrumb {
            id,
            kind,
            session_id: session_id.clone(),
            links,
            content: content.to_string(),
            context: context.map(str::to_string),
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            created_at,
        })
    }

    pub fn get_breadcrumb(&self, id: i64) -> Result<Breadcrumb> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {BREADCRUMB_COLUMNS} FROM breadcrumbs WHERE id = ?1"),
            params![id],
            Breadcrumb::from_row,
        )
        .optional()
        .with_context("Failed to query breadcrumb")?
        .ok_or_else(|| EmpiricaError::Validation(format!("Breadcrumb not found: {}", id)))
    }

    /// Query breadcrumbs by session and optional kind, newest first.
    pub fn query_breadcrumbs(
        &self,
        session_id: &SessionId,
        kind: Option<BreadcrumbKind>,
        unresolved_only: bool,
        limit: usize,
    ) -> Result<Vec<Breadcrumb>> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {BREADCRUMB_COLUMNS} FROM breadcrumbs WHERE session_id = ?1"
        );
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(session_id.as_str().to_string())];

        if let Some(kind) = kind {
            bound.push(Box::new(kind.as_str().to_string()));
            sql.push_str(&format!(" AND kind = ?{}", bound.len()));
        }
        if unresolved_only {
            sql.push_str(" AND is_resolved = 0");
        }
        bound.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY id DESC LIMIT ?{}", bound.len()));

        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|p| p.as_ref()).collect();
        let crumbs = stmt
            .query_map(refs.as_slice(), Breadcrumb::from_row)?
            .filter_map(|r| log_filter_error(r, "querying breadcrumbs"))
            .collect();
        Ok(crumbs)
    }

    /// Resolve an unknown. Only unknowns resolve; a resolved unknown is
    /// immutable, so a second resolve is rejected.
    pub fn resolve_unknown(&self, id: i64, resolver: &str) -> Result<Breadcrumb> {
        let crumb = self.get_breadcrumb(id)?;
        if crumb.kind != BreadcrumbKind::Unknown {
            return Err(EmpiricaError::Validation(format!(
                "Breadcrumb {} is a {}, not an unknown",
                id,
                crumb.kind.as_str()
            )));
        }
        if crumb.is_resolved {
            return Err(EmpiricaError::Validation(format!(
                "Unknown {} is already resolved by {}",
                id,
                crumb.resolved_by.as_deref().unwrap_or("?")
            )));
        }

        let resolved_at = now_rfc3339();
        self.conn()?
            .execute(
                "UPDATE breadcrumbs SET is_resolved = 1, resolved_by = ?2, resolved_at = ?3
                 WHERE id = ?1 AND is_resolved = 0",
                params![id, resolver, resolved_at],
            )
            .with_context("Failed to resolve unknown")?;
        self.get_breadcrumb(id)
    }
}
