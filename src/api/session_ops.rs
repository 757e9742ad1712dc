//! Session operations: create, get, end, list, resume.

use serde::{Deserialize, Serialize};

use super::Core;
use crate::resolve::{InstanceContext, ResolverIndex, TtyContext};
use crate::store::{BreadcrumbKind, Session};
use crate::types::{AiId, EmpiricaError, ProjectId, Result};
use crate::vectors::VectorMap;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreateRequest {
    pub ai_id: String,
    #[serde(default)]
    pub bootstrap_level: i64,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCreateResponse {
    pub session_id: String,
    pub ai_id: String,
    pub start_time: String,
}

/// How `session.resume` selects its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    Last,
    LastN(usize),
    SessionId(String),
}

/// Per-session slice of the epistemic trajectory.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTrajectory {
    pub session: Session,
    pub reflex_count: usize,
    pub cascade_count: usize,
    /// Latest recorded vectors, when any reflex exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_vectors: Option<VectorMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_confidence: Option<f64>,
    pub open_unknowns: usize,
    /// Handoff summaries, newest first
    pub handoffs: Vec<crate::store::Handoff>,
    /// Present at `detail_level = "full"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflexes: Option<Vec<crate::store::Reflex>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeReport {
    pub ai_id: String,
    pub sessions: Vec<SessionTrajectory>,
}

impl Core {
    /// session.create
    pub fn session_create(&self, request: &SessionCreateRequest) -> Result<SessionCreateResponse> {
        let ai_id = AiId::new(request.ai_id.clone());
        let project_id = request.project_id.clone().map(ProjectId::new);
        let session = self.db().create_session(
            &ai_id,
            request.bootstrap_level,
            project_id.as_ref(),
            request.subject.as_deref(),
            request.user_id.as_deref(),
        )?;

        self.record_ambient_context(&session);

        Ok(SessionCreateResponse {
            session_id: session.session_id.into_inner(),
            ai_id: session.ai_id.into_inner(),
            start_time: session.start_time,
        })
    }

    /// session.get
    pub fn session_get(&self, id_or_alias: &str) -> Result<Session> {
        let session_id = self.resolve_session(id_or_alias)?;
        self.db().get_session(&session_id)
    }

    /// session.end
    pub fn session_end(&self, id_or_alias: &str) -> Result<Session> {
        let session_id = self.resolve_session(id_or_alias)?;
        crate::resolve::clear_active_transaction(self.project_root(), self.instance())?;
        self.db().end_session(&session_id)
    }

    /// session.list
    pub fn session_list(
        &self,
        ai_id: Option<&str>,
        active_only: bool,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let ai_id = ai_id.map(AiId::new);
        self.db().list_sessions(ai_id.as_ref(), active_only, limit)
    }

    /// session.resume: the epistemic trajectory summary an agent loads
    /// instead of replaying full context.
    pub fn session_resume(
        &self,
        ai_id: &str,
        mode: ResumeMode,
        detail_full: bool,
    ) -> Result<ResumeReport> {
        let ai = AiId::new(ai_id);
        let sessions = match mode {
            ResumeMode::Last => self.db().list_sessions(Some(&ai), false, 1)?,
            ResumeMode::LastN(n) => self.db().list_sessions(Some(&ai), false, n.max(1))?,
            ResumeMode::SessionId(id) => {
                let session_id = self.resolve_session(&id)?;
                vec![self.db().get_session(&session_id)?]
            }
        };
        if sessions.is_empty() {
            return Err(EmpiricaError::session_not_found(format!(
                "no sessions for {}",
                ai_id
            )));
        }

        let mut trajectories = Vec::with_capacity(sessions.len());
        for session in sessions {
            let reflexes = self.db().list_reflexes(&session.session_id)?;
            let cascades = self.db().list_cascades(&session.session_id)?;
            let unknowns = self.db().query_breadcrumbs(
                &session.session_id,
                Some(BreadcrumbKind::Unknown),
                true,
                1000,
            )?;
            let handoffs = self.db().list_handoffs(&session.session_id)?;
            let latest = reflexes.last();
            trajectories.push(SessionTrajectory {
                latest_vectors: latest.map(|r| r.vectors),
                latest_confidence: latest.map(|r| r.vectors.confidence()),
                reflex_count: reflexes.len(),
                cascade_count: cascades.len(),
                open_unknowns: unknowns.len(),
                handoffs,
                reflexes: detail_full.then_some(reflexes),
                session,
            });
        }

        Ok(ResumeReport {
            ai_id: ai_id.to_string(),
            sessions: trajectories,
        })
    }

    /// session.handoff: record a resume summary for a later agent.
    pub fn session_handoff(
        &self,
        id_or_alias: &str,
        summary: &str,
        next_steps: Option<&str>,
    ) -> Result<i64> {
        let session_id = self.resolve_session(id_or_alias)?;
        self.db().add_handoff(&session_id, summary, next_steps)
    }

    /// Tie the new session to the ambient instance and TTY so later calls
    /// resolve it without explicit ids. Context failures are logged, never
    /// fatal: a session without ambient context still works by id.
    fn record_ambient_context(&self, session: &Session) {
        let Ok(index) =
            ResolverIndex::default_location(self.config().resolver.stale_horizon_hours)
        else {
            return;
        };
        let timestamp = chrono::Utc::now().to_rfc3339();
        let project_path = self.project_root().to_string_lossy().to_string();

        if let Some(instance) = self.instance()
            && let Err(e) = index.record_instance(
                instance,
                &InstanceContext {
                    project_path: project_path.clone(),
                    project_id: session.project_id.as_ref().map(|p| p.as_str().to_string()),
                    session_id: Some(session.session_id.as_str().to_string()),
                    timestamp: timestamp.clone(),
                },
            )
        {
            tracing::warn!("Failed to record instance context: {}", e);
        }

        if let Some(tty) = crate::resolve::tty_key()
            && let Err(e) = index.record_tty(
                &tty,
                &TtyContext {
                    claude_conversation_id: None,
                    session_id: session.session_id.as_str().to_string(),
                    project_path,
                    timestamp,
                },
            )
        {
            tracing::warn!("Failed to record TTY context: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::core;

    fn create(core: &Core, ai: &str) -> String {
        core.session_create(&SessionCreateRequest {
            ai_id: ai.to_string(),
            bootstrap_level: 1,
            project_id: None,
            subject: Some("demo".to_string()),
            user_id: None,
        })
        .expect("create")
        .session_id
    }

    #[test]
    fn test_create_get_end() {
        let (_dir, core) = core();
        let id = create(&core, "agent-A");

        let session = core.session_get(&id).expect("get");
        assert!(session.is_active());
        assert_eq!(session.subject.as_deref(), Some("demo"));

        let ended = core.session_end(&id).expect("end");
        assert!(!ended.is_active());
    }

    #[test]
    fn test_get_by_alias() {
        let (_dir, core) = core();
        let id = create(&core, "worker");
        let session = core.session_get("latest:active:worker").expect("alias");
        assert_eq!(session.session_id.as_str(), id);
    }

    #[test]
    fn test_resume_summarises() {
        let (_dir, core) = core();
        create(&core, "agent-A");
        create(&core, "agent-A");
        core.session_handoff("latest", "store layer done", Some("wire gates"))
            .expect("handoff");

        let report = core
            .session_resume("agent-A", ResumeMode::LastN(5), false)
            .expect("resume");
        assert_eq!(report.sessions.len(), 2);
        assert_eq!(report.sessions[0].reflex_count, 0);
        assert!(report.sessions[0].reflexes.is_none());
        assert_eq!(report.sessions[0].handoffs.len(), 1);
        assert_eq!(report.sessions[0].handoffs[0].summary, "store layer done");

        let err = core
            .session_resume("ghost", ResumeMode::Last, false)
            .unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::SessionNotFound);
    }
}
