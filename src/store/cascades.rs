//! Cascade repository.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::cascade::Phase;
use crate::types::{
    CascadeId, EmpiricaError, GoalId, Result, ResultExt, SessionId, log_filter_error,
};

/// One pass of the CASCADE state machine within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cascade {
    pub cascade_id: CascadeId,
    pub session_id: SessionId,
    pub task: String,
    pub context_json: Option<serde_json::Value>,
    pub goal_id: Option<GoalId>,
    pub preflight_completed: bool,
    pub check_completed: bool,
    pub investigate_completed: bool,
    pub act_completed: bool,
    pub postflight_completed: bool,
    pub final_action: Option<String>,
    pub final_confidence: Option<f64>,
    pub investigation_rounds: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub engagement_gate_passed: Option<bool>,
}

impl Cascade {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let context: Option<String> = row.get(3)?;
        Ok(Cascade {
            cascade_id: CascadeId::new(row.get::<_, String>(0)?),
            session_id: SessionId::new(row.get::<_, String>(1)?),
            task: row.get(2)?,
            context_json: context.and_then(|s| serde_json::from_str(&s).ok()),
            goal_id: row.get::<_, Option<String>>(4)?.map(GoalId::new),
            preflight_completed: row.get::<_, i64>(5)? != 0,
            check_completed: row.get::<_, i64>(6)? != 0,
            investigate_completed: row.get::<_, i64>(7)? != 0,
            act_completed: row.get::<_, i64>(8)? != 0,
            postflight_completed: row.get::<_, i64>(9)? != 0,
            final_action: row.get(10)?,
            final_confidence: row.get(11)?,
            investigation_rounds: row.get(12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
            engagement_gate_passed: row.get::<_, Option<i64>>(15)?.map(|v| v != 0),
        })
    }
}

const CASCADE_COLUMNS: &str = "cascade_id, session_id, task, context_json, goal_id, \
                               preflight_completed, check_completed, investigate_completed, \
                               act_completed, postflight_completed, final_action, \
                               final_confidence, investigation_rounds, started_at, \
                               completed_at, engagement_gate_passed";

impl Database {
    /// Create a cascade under an existing session.
    pub fn create_cascade(
        &self,
        session_id: &SessionId,
        task: &str,
        context: Option<&serde_json::Value>,
        goal_id: Option<&GoalId>,
    ) -> Result<Cascade> {
        if task.trim().is_empty() {
            return Err(EmpiricaError::invalid_field("task", "must not be empty"));
        }
        // Friendlier error than the FK violation
        self.get_session(session_id)?;

        let cascade = Cascade {
            cascade_id: CascadeId::generate(),
            session_id: session_id.clone(),
            task: task.to_string(),
            context_json: context.cloned(),
            goal_id: goal_id.cloned(),
            preflight_completed: false,
            check_completed: false,
            investigate_completed: false,
            act_completed: false,
            postflight_completed: false,
            final_action: None,
            final_confidence: None,
            investigation_rounds: 0,
            started_at: now_rfc3339(),
            completed_at: None,
            engagement_gate_passed: None,
        };

        let context_str = context.map(|v| serde_json::to_string(v)).transpose()?;
        self.conn()?
            .execute(
                "INSERT INTO cascades (cascade_id, session_id, task, context_json, goal_id, \
                 started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    cascade.cascade_id.as_str(),
                    cascade.session_id.as_str(),
                    cascade.task,
                    context_str,
                    cascade.goal_id.as_ref().map(|g| g.as_str()),
                    cascade.started_at,
                ],
            )
            .with_context("Failed to insert cascade")?;

        tracing::info!(cascade_id = %cascade.cascade_id, "Cascade created");
        Ok(cascade)
    }

    pub fn get_cascade(&self, cascade_id: &CascadeId) -> Result<Cascade> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {CASCADE_COLUMNS} FROM cascades WHERE cascade_id = ?1"),
            params![cascade_id.as_str()],
            Cascade::from_row,
        )
        .optional()
        .with_context("Failed to query cascade")?
        .ok_or_else(|| EmpiricaError::Validation(format!("Cascade not found: {}", cascade_id)))
    }

    /// Cascades of one session in start order.
    pub fn list_cascades(&self, session_id: &SessionId) -> Result<Vec<Cascade>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CASCADE_COLUMNS} FROM cascades WHERE session_id = ?1 ORDER BY started_at, cascade_id"
        ))?;
        let cascades = stmt
            .query_map(params![session_id.as_str()], Cascade::from_row)?
            .filter_map(|r| log_filter_error(r, "listing cascades"))
            .collect();
        Ok(cascades)
    }

    /// Mark a phase completion bit. Bits only ever go false→true.
    pub fn mark_cascade_phase(
        &self,
        cascade_id: &CascadeId,
        phase: Phase,
        engagement_gate_passed: Option<bool>,
    ) -> Result<()> {
        let column = match phase {
            Phase::Preflight => "preflight_completed",
            Phase::Check => "check_completed",
            Phase::Act => "act_completed",
            Phase::Postflight => "postflight_completed",
        };

        let conn = self.conn()?;
        match engagement_gate_passed {
            Some(passed) => conn.execute(
                &format!(
                    "UPDATE cascades SET {column} = 1, engagement_gate_passed = ?2
                     WHERE cascade_id = ?1"
                ),
                params![cascade_id.as_str(), passed as i64],
            ),
            None => conn.execute(
                &format!("UPDATE cascades SET {column} = 1 WHERE cascade_id = ?1"),
                params![cascade_id.as_str()],
            ),
        }
        .with_context_fn(|| format!("Failed to mark {} on cascade", phase))?;
        Ok(())
    }

    /// Bump the investigation-round counter after a CHECK. A second round
    /// means an investigation loop actually ran, which also sets the
    /// investigate bit.
    pub fn record_investigation_round(&self, cascade_id: &CascadeId, round: u32) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE cascades SET
                     investigation_rounds = MAX(investigation_rounds, ?2),
                     investigate_completed = CASE WHEN ?2 >= 2 THEN 1
                                                  ELSE investigate_completed END
                 WHERE cascade_id = ?1",
                params![cascade_id.as_str(), round as i64],
            )
            .with_context("Failed to record investigation round")?;
        Ok(())
    }

    /// Close a cascade at POSTFLIGHT: set the completion bit, final
    /// aggregates, and `completed_at` in one transaction.
    pub fn finalize_cascade(
        &self,
        cascade_id: &CascadeId,
        final_action: &str,
        final_confidence: f64,
    ) -> Result<Cascade> {
        let completed_at = now_rfc3339();
        self.transaction(|conn| {
            let affected = conn
                .execute(
                    "UPDATE cascades SET postflight_completed = 1, check_completed = 1, \
                     final_action = ?2, final_confidence = ?3, completed_at = ?4
                     WHERE cascade_id = ?1",
                    params![
                        cascade_id.as_str(),
                        final_action,
                        final_confidence,
                        completed_at
                    ],
                )
                .with_context("Failed to finalize cascade")?;
            if affected == 0 {
                return Err(EmpiricaError::Validation(format!(
                    "Cascade not found: {}",
                    cascade_id
                )));
            }
            Ok(())
        })?;

        let cascade = self.get_cascade(cascade_id)?;
        self.refresh_session_aggregates(&cascade.session_id)?;
        Ok(cascade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AiId;

    fn session(db: &Database) -> SessionId {
        db.create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("session")
            .session_id
    }

    #[test]
    fn test_create_and_get() {
        let db = Database::open_in_memory().expect("open");
        let session_id = session(&db);

        let context = serde_json::json!({"repo": "demo"});
        let cascade = db
            .create_cascade(&session_id, "fix flaky test", Some(&context), None)
            .expect("create");

        let loaded = db.get_cascade(&cascade.cascade_id).expect("get");
        assert_eq!(loaded.task, "fix flaky test");
        assert_eq!(loaded.context_json.unwrap()["repo"], "demo");
        assert!(!loaded.preflight_completed);
        assert!(loaded.completed_at.is_none());
    }

    #[test]
    fn test_empty_task_rejected() {
        let db = Database::open_in_memory().expect("open");
        let session_id = session(&db);
        assert!(db.create_cascade(&session_id, "  ", None, None).is_err());
    }

    #[test]
    fn test_phase_bits_and_finalize() {
        let db = Database::open_in_memory().expect("open");
        let session_id = session(&db);
        let cascade = db
            .create_cascade(&session_id, "task", None, None)
            .expect("create");

        db.mark_cascade_phase(&cascade.cascade_id, Phase::Preflight, Some(true))
            .expect("preflight");
        db.mark_cascade_phase(&cascade.cascade_id, Phase::Check, None)
            .expect("check");
        db.record_investigation_round(&cascade.cascade_id, 1)
            .expect("round 1");
        assert!(!db.get_cascade(&cascade.cascade_id).expect("get").investigate_completed);
        db.record_investigation_round(&cascade.cascade_id, 2)
            .expect("round 2");
        assert!(db.get_cascade(&cascade.cascade_id).expect("get").investigate_completed);

        let closed = db
            .finalize_cascade(&cascade.cascade_id, "proceed", 0.82)
            .expect("finalize");
        assert!(closed.postflight_completed);
        assert!(closed.preflight_completed);
        assert_eq!(closed.final_action.as_deref(), Some("proceed"));
        assert_eq!(closed.final_confidence, Some(0.82));
        assert_eq!(closed.investigation_rounds, 2);
        assert!(closed.completed_at.is_some());

        let refreshed = db.get_session(&session_id).expect("session");
        assert_eq!(refreshed.total_cascades, 1);
        assert_eq!(refreshed.avg_confidence, Some(0.82));
    }

    #[test]
    fn test_finalize_requires_preflight_bit() {
        let db = Database::open_in_memory().expect("open");
        let session_id = session(&db);
        let cascade = db
            .create_cascade(&session_id, "task", None, None)
            .expect("create");

        // Schema CHECK: postflight requires preflight + check bits.
        let err = db.finalize_cascade(&cascade.cascade_id, "proceed", 0.5);
        assert!(err.is_err());
    }
}
