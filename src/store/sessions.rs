//! Session repository.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::types::{AiId, EmpiricaError, ProjectId, Result, ResultExt, SessionId, log_filter_error};

/// A bounded unit of AI work. Active while `end_time` is null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub ai_id: AiId,
    pub user_id: Option<String>,
    pub project_id: Option<ProjectId>,
    /// Workstream tag
    pub subject: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub bootstrap_level: i64,
    pub total_cascades: i64,
    pub avg_confidence: Option<f64>,
    pub drift_detected: bool,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Session {
            session_id: SessionId::new(row.get::<_, String>(0)?),
            ai_id: AiId::new(row.get::<_, String>(1)?),
            user_id: row.get(2)?,
            project_id: row.get::<_, Option<String>>(3)?.map(ProjectId::new),
            subject: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            bootstrap_level: row.get(7)?,
            total_cascades: row.get(8)?,
            avg_confidence: row.get(9)?,
            drift_detected: row.get::<_, i64>(10)? != 0,
        })
    }
}

const SESSION_COLUMNS: &str = "session_id, ai_id, user_id, project_id, subject, start_time, \
                               end_time, bootstrap_level, total_cascades, avg_confidence, \
                               drift_detected";

/// A summary written at a handoff point, loaded ahead of full reflex
/// history when an agent resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub id: i64,
    pub session_id: SessionId,
    pub summary: String,
    pub next_steps: Option<String>,
    pub created_at: String,
}

impl Database {
    /// Create a session and return its generated id.
    pub fn create_session(
        &self,
        ai_id: &AiId,
        bootstrap_level: i64,
        project_id: Option<&ProjectId>,
        subject: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Session> {
        ai_id.validate()?;
        if let Some(project) = project_id {
            // FK would reject anyway; this produces the friendlier error.
            self.get_project(project)?;
        }

        let session = Session {
            session_id: SessionId::generate(),
            ai_id: ai_id.clone(),
            user_id: user_id.map(str::to_string),
            project_id: project_id.cloned(),
            subject: subject.map(str::to_string),
            start_time: now_rfc3339(),
            end_time: None,
            bootstrap_level,
            total_cascades: 0,
            avg_confidence: None,
            drift_detected: false,
        };

        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, ai_id, user_id, project_id, subject, \
                 start_time, bootstrap_level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session.session_id.as_str(),
                    session.ai_id.as_str(),
                    session.user_id,
                    session.project_id.as_ref().map(|p| p.as_str()),
                    session.subject,
                    session.start_time,
                    session.bootstrap_level,
                ],
            )
            .with_context("Failed to insert session")?;

            if let Some(project) = &session.project_id {
                conn.execute(
                    "UPDATE projects SET session_count = session_count + 1, updated_at = ?2
                     WHERE project_id = ?1",
                    params![project.as_str(), session.start_time],
                )
                .with_context("Failed to bump project session count")?;
            }
            Ok(())
        })?;

        tracing::info!(session_id = %session.session_id, ai_id = %session.ai_id, "Session created");
        Ok(session)
    }

    /// Fetch one session by exact id.
    pub fn get_session(&self, session_id: &SessionId) -> Result<Session> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
            params![session_id.as_str()],
            Session::from_row,
        )
        .optional()
        .with_context("Failed to query session")?
        .ok_or_else(|| EmpiricaError::session_not_found(session_id.as_str()))
    }

    /// Mark a session ended. Idempotent for already-ended sessions.
    pub fn end_session(&self, session_id: &SessionId) -> Result<Session> {
        let mut session = self.get_session(session_id)?;
        if session.end_time.is_some() {
            return Ok(session);
        }

        // end_time >= start_time even when clocks step backwards
        let end_time = now_rfc3339().max(session.start_time.clone());
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET end_time = ?2 WHERE session_id = ?1",
            params![session_id.as_str(), end_time],
        )
        .with_context("Failed to end session")?;

        session.end_time = Some(end_time);
        Ok(session)
    }

    /// List sessions, newest first, optionally scoped by agent and liveness.
    pub fn list_sessions(
        &self,
        ai_id: Option<&AiId>,
        active_only: bool,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE 1=1");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ai) = ai_id {
            bound.push(Box::new(ai.as_str().to_string()));
            sql.push_str(&format!(" AND ai_id = ?{}", bound.len()));
        }
        if active_only {
            sql.push_str(" AND end_time IS NULL");
        }
        bound.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY start_time DESC LIMIT ?{}", bound.len()));

        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|p| p.as_ref()).collect();
        let sessions = stmt
            .query_map(refs.as_slice(), Session::from_row)?
            .filter_map(|r| log_filter_error(r, "listing sessions"))
            .collect();
        Ok(sessions)
    }

    /// Refresh the derived aggregates on a session row after a cascade closes.
    pub fn refresh_session_aggregates(&self, session_id: &SessionId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET
                 total_cascades = (SELECT COUNT(*) FROM cascades
                                   WHERE session_id = ?1 AND postflight_completed = 1),
                 avg_confidence = (SELECT AVG(final_confidence) FROM cascades
                                   WHERE session_id = ?1 AND final_confidence IS NOT NULL)
             WHERE session_id = ?1",
            params![session_id.as_str()],
        )
        .with_context("Failed to refresh session aggregates")?;
        Ok(())
    }

    /// Record that drift was observed within a session.
    pub fn flag_session_drift(&self, session_id: &SessionId) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE sessions SET drift_detected = 1 WHERE session_id = ?1",
                params![session_id.as_str()],
            )
            .with_context("Failed to flag session drift")?;
        Ok(())
    }

    /// Record a handoff summary for resuming this session later.
    pub fn add_handoff(
        &self,
        session_id: &SessionId,
        summary: &str,
        next_steps: Option<&str>,
    ) -> Result<i64> {
        if summary.trim().is_empty() {
            return Err(EmpiricaError::invalid_field("summary", "must not be empty"));
        }
        self.get_session(session_id)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO handoffs (session_id, summary, next_steps, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id.as_str(), summary, next_steps, now_rfc3339()],
        )
        .with_context("Failed to insert handoff")?;
        Ok(conn.last_insert_rowid())
    }

    /// Handoff summaries of a session, newest first.
    pub fn list_handoffs(&self, session_id: &SessionId) -> Result<Vec<Handoff>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, summary, next_steps, created_at
             FROM handoffs WHERE session_id = ?1 ORDER BY id DESC",
        )?;
        let handoffs = stmt
            .query_map(params![session_id.as_str()], |row| {
                Ok(Handoff {
                    id: row.get(0)?,
                    session_id: SessionId::new(row.get::<_, String>(1)?),
                    summary: row.get(2)?,
                    next_steps: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| log_filter_error(r, "listing handoffs"))
            .collect();
        Ok(handoffs)
    }

    /// Admin: delete a session and everything it owns.
    pub fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        let affected = self
            .conn()?
            .execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                params![session_id.as_str()],
            )
            .with_context("Failed to delete session")?;
        if affected == 0 {
            return Err(EmpiricaError::session_not_found(session_id.as_str()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let db = Database::open_in_memory().expect("open");
        let session = db
            .create_session(&AiId::new("agent-A"), 2, None, Some("refactor"), None)
            .expect("create");

        let loaded = db.get_session(&session.session_id).expect("get");
        assert_eq!(loaded.ai_id.as_str(), "agent-A");
        assert_eq!(loaded.subject.as_deref(), Some("refactor"));
        assert_eq!(loaded.bootstrap_level, 2);
        assert!(loaded.is_active());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let db = Database::open_in_memory().expect("open");
        let err = db.get_session(&SessionId::new("nope")).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::SessionNotFound);
    }

    #[test]
    fn test_end_session_is_idempotent() {
        let db = Database::open_in_memory().expect("open");
        let session = db
            .create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("create");

        let ended = db.end_session(&session.session_id).expect("end");
        assert!(!ended.is_active());
        let first_end = ended.end_time.clone();

        let again = db.end_session(&session.session_id).expect("end again");
        assert_eq!(again.end_time, first_end);
    }

    #[test]
    fn test_list_filters() {
        let db = Database::open_in_memory().expect("open");
        let a1 = db
            .create_session(&AiId::new("worker"), 0, None, None, None)
            .expect("create");
        let _a2 = db
            .create_session(&AiId::new("worker"), 0, None, None, None)
            .expect("create");
        let _b = db
            .create_session(&AiId::new("other"), 0, None, None, None)
            .expect("create");
        db.end_session(&a1.session_id).expect("end");

        let workers = db
            .list_sessions(Some(&AiId::new("worker")), false, 10)
            .expect("list");
        assert_eq!(workers.len(), 2);

        let active_workers = db
            .list_sessions(Some(&AiId::new("worker")), true, 10)
            .expect("list");
        assert_eq!(active_workers.len(), 1);
        assert!(active_workers[0].is_active());
    }

    #[test]
    fn test_handoffs() {
        let db = Database::open_in_memory().expect("open");
        let session = db
            .create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("create");

        db.add_handoff(&session.session_id, "migrated the store", Some("wire the CLI"))
            .expect("first");
        db.add_handoff(&session.session_id, "CLI wired", None)
            .expect("second");

        let handoffs = db.list_handoffs(&session.session_id).expect("list");
        assert_eq!(handoffs.len(), 2);
        assert_eq!(handoffs[0].summary, "CLI wired");

        assert!(db.add_handoff(&session.session_id, "  ", None).is_err());
    }

    #[test]
    fn test_invalid_project_rejected() {
        let db = Database::open_in_memory().expect("open");
        let err = db
            .create_session(
                &AiId::new("agent-A"),
                0,
                Some(&ProjectId::new("ghost")),
                None,
                None,
            )
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
