//! Goal and subtask repository.
//!
//! Goals are owned by their creating session but read-shared across agents;
//! mutation by another agent requires an explicit claim.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::types::{
    AiId, EmpiricaError, GoalId, Result, ResultExt, SessionId, log_filter_error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    InProgress,
    Complete,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Critical,
    High,
    Medium,
    Low,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A hierarchical intent with a three-axis scope estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub goal_id: GoalId,
    pub session_id: SessionId,
    pub objective: String,
    /// breadth / duration / coordination, each in [0, 1]
    pub scope: (f64, f64, f64),
    pub estimated_complexity: Option<f64>,
    pub status: GoalStatus,
    pub claimed_by: Option<AiId>,
    pub created_timestamp: String,
    pub completed_timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub subtask_id: String,
    pub goal_id: GoalId,
    pub description: String,
    pub status: GoalStatus,
    pub epistemic_importance: Importance,
    pub completion_evidence: Option<String>,
    pub created_timestamp: String,
    pub completed_timestamp: Option<String>,
}

/// Progress roll-up for one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal_id: GoalId,
    pub status: GoalStatus,
    pub total_subtasks: usize,
    pub completed_subtasks: usize,
    pub open_critical: usize,
}

impl Goal {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status_str: String = row.get(7)?;
        Ok(Goal {
            goal_id: GoalId::new(row.get::<_, String>(0)?),
            session_id: SessionId::new(row.get::<_, String>(1)?),
            objective: row.get(2)?,
            scope: (row.get(3)?, row.get(4)?, row.get(5)?),
            estimated_complexity: row.get(6)?,
            status: GoalStatus::try_parse(&status_str).unwrap_or(GoalStatus::InProgress),
            claimed_by: row.get::<_, Option<String>>(8)?.map(AiId::new),
            created_timestamp: row.get(9)?,
            completed_timestamp: row.get(10)?,
        })
    }
}

impl Subtask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status_str: String = row.get(3)?;
        let importance_str: String = row.get(4)?;
        Ok(Subtask {
            subtask_id: row.get(0)?,
            goal_id: GoalId::new(row.get::<_, String>(1)?),
            description: row.get(2)?,
            status: GoalStatus::try_parse(&status_str).unwrap_or(GoalStatus::InProgress),
            epistemic_importance: Importance::try_parse(&importance_str)
                .unwrap_or(Importance::Medium),
            completion_evidence: row.get(5)?,
            created_timestamp: row.get(6)?,
            completed_timestamp: row.get(7)?,
        })
    }
}

const GOAL_COLUMNS: &str = "goal_id, session_id, objective, scope_breadth, scope_duration, \
                            scope_coordination, estimated_complexity, status, claimed_by, \
                            created_timestamp, completed_timestamp";

const SUBTASK_COLUMNS: &str = "subtask_id, goal_id, description, status, epistemic_importance, \
                               completion_evidence, created_timestamp, completed_timestamp";

impl Database {
    pub fn create_goal(
        &self,
        session_id: &SessionId,
        objective: &str,
        scope: (f64, f64, f64),
        estimated_complexity: Option<f64>,
    ) -> Result<Goal> {
        if objective.trim().is_empty() {
            return Err(EmpiricaError::Validation(
                "Goal objective must not be empty".to_string(),
            ));
        }
        for (axis, value) in [
            ("breadth", scope.0),
            ("duration", scope.1),
            ("coordination", scope.2),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EmpiricaError::Validation(format!(
                    "Goal scope {} must be in [0, 1], got {}",
                    axis, value
                )));
            }
        }
        self.get_session(session_id)?;

        let goal = Goal {
            goal_id: GoalId::generate(),
            session_id: session_id.clone(),
            objective: objective.to_string(),
            scope,
            estimated_complexity,
            status: GoalStatus::InProgress,
            claimed_by: None,
            created_timestamp: now_rfc3339(),
            completed_timestamp: None,
        };

        self.conn()?
            .execute(
                "INSERT INTO goals (goal_id, session_id, objective, scope_breadth, \
                 scope_duration, scope_coordination, estimated_complexity, created_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    goal.goal_id.as_str(),
                    goal.session_id.as_str(),
                    goal.objective,
                    goal.scope.0,
                    goal.scope.1,
                    goal.scope.2,
                    goal.estimated_complexity,
                    goal.created_timestamp,
                ],
            )
            .with_context("Failed to insert goal")?;

        Ok(goal)
    }

    pub fn get_goal(&self, goal_id: &GoalId) -> Result<Goal> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {GOAL_COLUMNS} FROM goals WHERE goal_id = ?1"),
            params![goal_id.as_str()],
            Goal::from_row,
        )
        .optional()
        .with_context("Failed to query goal")?
        .ok_or_else(|| EmpiricaError::Validation(format!("Goal not found: {}", goal_id)))
    }

    /// Goals visible to a session: its own plus unclaimed goals of others.
    pub fn list_goals(&self, session_id: Option<&SessionId>) -> Result<Vec<Goal>> {
        let conn = self.conn()?;
        let goals = match session_id {
            Some(session) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {GOAL_COLUMNS} FROM goals WHERE session_id = ?1
                     ORDER BY created_timestamp"
                ))?;
                stmt.query_map(params![session.as_str()], Goal::from_row)?
                    .filter_map(|r| log_filter_error(r, "listing goals"))
                    .collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {GOAL_COLUMNS} FROM goals ORDER BY created_timestamp"
                ))?;
                stmt.query_map([], Goal::from_row)?
                    .filter_map(|r| log_filter_error(r, "listing goals"))
                    .collect()
            }
        };
        Ok(goals)
    }

    /// Claim a goal for mutation by another agent. First claim wins.
    pub fn claim_goal(&self, goal_id: &GoalId, ai_id: &AiId) -> Result<Goal> {
        ai_id.validate()?;
        let affected = self
            .conn()?
            .execute(
                "UPDATE goals SET claimed_by = ?2
                 WHERE goal_id = ?1 AND (claimed_by IS NULL OR claimed_by = ?2)
                   AND status = 'in_progress'",
                params![goal_id.as_str(), ai_id.as_str()],
            )
            .with_context("Failed to claim goal")?;
        if affected == 0 {
            let goal = self.get_goal(goal_id)?;
            return Err(EmpiricaError::Validation(match goal.claimed_by {
                Some(owner) => format!("Goal {} already claimed by {}", goal_id, owner),
                None => format!("Goal {} is not claimable (status {})", goal_id, goal.status.as_str()),
            }));
        }
        self.get_goal(goal_id)
    }

    pub fn add_subtask(
        &self,
        goal_id: &GoalId,
        description: &str,
        importance: Importance,
    ) -> Result<Subtask> {
        if description.trim().is_empty() {
            return Err(EmpiricaError::Validation(
                "Subtask description must not be empty".to_string(),
            ));
        }
        self.get_goal(goal_id)?;

        let subtask = Subtask {
            subtask_id: uuid::Uuid::new_v4().to_string(),
            goal_id: goal_id.clone(),
            description: description.to_string(),
            status: GoalStatus::InProgress,
            epistemic_importance: importance,
            completion_evidence: None,
            created_timestamp: now_rfc3339(),
            completed_timestamp: None,
        };

        self.conn()?
            .execute(
                "INSERT INTO subtasks (subtask_id, goal_id, description, \
                 epistemic_importance, created_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    subtask.subtask_id,
                    subtask.goal_id.as_str(),
                    subtask.description,
                    subtask.epistemic_importance.as_str(),
                    subtask.created_timestamp,
                ],
            )
            .with_context("Failed to insert subtask")?;

        Ok(subtask)
    }

    pub fn complete_subtask(
        &self,
        subtask_id: &str,
        completion_evidence: Option<&str>,
    ) -> Result<Subtask> {
        let completed = now_rfc3339();
        let affected = self
            .conn()?
            .execute(
                "UPDATE subtasks SET status = 'complete', completion_evidence = ?2, \
                 completed_timestamp = ?3
                 WHERE subtask_id = ?1 AND status != 'complete'",
                params![subtask_id, completion_evidence, completed],
            )
            .with_context("Failed to complete subtask")?;
        if affected == 0 {
            // Either missing or already complete; disambiguate for the caller.
            return self.get_subtask(subtask_id);
        }
        self.get_subtask(subtask_id)
    }

    pub fn get_subtask(&self, subtask_id: &str) -> Result<Subtask> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE subtask_id = ?1"),
            params![subtask_id],
            Subtask::from_row,
        )
        .optional()
        .with_context("Failed to query subtask")?
        .ok_or_else(|| EmpiricaError::Validation(format!("Subtask not found: {}", subtask_id)))
    }

    pub fn list_subtasks(&self, goal_id: &GoalId) -> Result<Vec<Subtask>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE goal_id = ?1 ORDER BY created_timestamp"
        ))?;
        let subtasks = stmt
            .query_map(params![goal_id.as_str()], Subtask::from_row)?
            .filter_map(|r| log_filter_error(r, "listing subtasks"))
            .collect();
        Ok(subtasks)
    }

    /// Roll up subtask completion for a goal.
    pub fn goal_progress(&self, goal_id: &GoalId) -> Result<GoalProgress> {
        let goal = self.get_goal(goal_id)?;
        let subtasks = self.list_subtasks(goal_id)?;
        let completed = subtasks
            .iter()
            .filter(|s| s.status == GoalStatus::Complete)
            .count();
        let open_critical = subtasks
            .iter()
            .filter(|s| {
                s.epistemic_importance == Importance::Critical && s.status != GoalStatus::Complete
            })
            .count();
        Ok(GoalProgress {
            goal_id: goal.goal_id,
            status: goal.status,
            total_subtasks: subtasks.len(),
            completed_subtasks: completed,
            open_critical,
        })
    }

    /// Complete a goal. Rejected while any critical subtask remains open.
    pub fn complete_goal(&self, goal_id: &GoalId) -> Result<Goal> {
        let progress = self.goal_progress(goal_id)?;
        if progress.open_critical > 0 {
            return Err(EmpiricaError::Validation(format!(
                "Goal {} has {} open critical subtask(s)",
                goal_id, progress.open_critical
            )));
        }

        let completed = now_rfc3339();
        self.conn()?
            .execute(
                "UPDATE goals SET status = 'complete', completed_timestamp = ?2
                 WHERE goal_id = ?1 AND status != 'complete'",
                params![goal_id.as_str(), completed],
            )
            .with_context("Failed to complete goal")?;
        self.get_goal(goal_id)
    }

    /// Abandon a goal; keeps no completion timestamp.
    pub fn abandon_goal(&self, goal_id: &GoalId) -> Result<Goal> {
        self.conn()?
            .execute(
                "UPDATE goals SET status = 'abandoned'
                 WHERE goal_id = ?1 AND status = 'in_progress'",
                params![goal_id.as_str()],
            )
            .with_context("Failed to abandon goal")?;
        self.get_goal(goal_id)
    }
}
