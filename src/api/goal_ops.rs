//! Goal and subtask operations.

use serde::Deserialize;

use super::Core;
use crate::store::{Goal, GoalProgress, Importance, Subtask};
use crate::types::{AiId, EmpiricaError, GoalId, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct GoalCreateRequest {
    pub session_id: String,
    pub objective: String,
    /// breadth, duration, coordination, each in [0, 1]
    #[serde(default = "default_scope")]
    pub scope: (f64, f64, f64),
    #[serde(default)]
    pub estimated_complexity: Option<f64>,
}

fn default_scope() -> (f64, f64, f64) {
    (0.5, 0.5, 0.5)
}

impl Core {
    /// goal.create
    pub fn goal_create(&self, request: &GoalCreateRequest) -> Result<Goal> {
        let session_id = self.resolve_session(&request.session_id)?;
        self.db().create_goal(
            &session_id,
            &request.objective,
            request.scope,
            request.estimated_complexity,
        )
    }

    /// goal.add_subtask
    pub fn goal_add_subtask(
        &self,
        goal_id: &str,
        description: &str,
        importance: &str,
    ) -> Result<Subtask> {
        let importance = Importance::try_parse(importance).ok_or_else(|| {
            EmpiricaError::Validation(format!(
                "'{}' is not one of critical, high, medium, low",
                importance
            ))
        })?;
        self.db()
            .add_subtask(&GoalId::new(goal_id), description, importance)
    }

    /// goal.complete_subtask
    pub fn goal_complete_subtask(
        &self,
        subtask_id: &str,
        completion_evidence: Option<&str>,
    ) -> Result<Subtask> {
        self.db().complete_subtask(subtask_id, completion_evidence)
    }

    /// goal.progress
    pub fn goal_progress(&self, goal_id: &str) -> Result<GoalProgress> {
        self.db().goal_progress(&GoalId::new(goal_id))
    }

    /// goal.list
    pub fn goal_list(&self, session_id: Option<&str>) -> Result<Vec<Goal>> {
        let session_id = session_id.map(|s| self.resolve_session(s)).transpose()?;
        self.db().list_goals(session_id.as_ref())
    }

    /// goal.claim
    pub fn goal_claim(&self, goal_id: &str, ai_id: &str) -> Result<Goal> {
        self.db().claim_goal(&GoalId::new(goal_id), &AiId::new(ai_id))
    }

    /// goal.complete
    pub fn goal_complete(&self, goal_id: &str) -> Result<Goal> {
        self.db().complete_goal(&GoalId::new(goal_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::session_ops::SessionCreateRequest;
    use crate::api::test_support::core;
    use crate::store::GoalStatus;

    #[test]
    fn test_goal_flow_through_api() {
        let (_dir, core) = core();
        let sid = core
            .session_create(&SessionCreateRequest {
                ai_id: "agent-A".to_string(),
                bootstrap_level: 0,
                project_id: None,
                subject: None,
                user_id: None,
            })
            .expect("session")
            .session_id;

        let goal = core
            .goal_create(&GoalCreateRequest {
                session_id: "latest".to_string(),
                objective: "ship it".to_string(),
                scope: (0.4, 0.3, 0.1),
                estimated_complexity: None,
            })
            .expect("goal");
        assert_eq!(goal.session_id.as_str(), sid);

        let subtask = core
            .goal_add_subtask(goal.goal_id.as_str(), "tests", "critical")
            .expect("subtask");
        assert!(core.goal_complete(goal.goal_id.as_str()).is_err());

        core.goal_complete_subtask(&subtask.subtask_id, Some("done"))
            .expect("complete subtask");
        let done = core.goal_complete(goal.goal_id.as_str()).expect("complete");
        assert_eq!(done.status, GoalStatus::Complete);

        let progress = core.goal_progress(goal.goal_id.as_str()).expect("progress");
        assert_eq!(progress.completed_subtasks, 1);

        assert!(core.goal_add_subtask(goal.goal_id.as_str(), "x", "urgent").is_err());
    }
}
