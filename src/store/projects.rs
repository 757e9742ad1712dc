//! Project repository.
//!
//! A project is a long-lived container across sessions; deleting a project
//! never deletes sessions.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::types::{EmpiricaError, ProjectId, Result, ResultExt, log_filter_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Dormant,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dormant => "dormant",
            Self::Archived => "archived",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "dormant" => Some(Self::Dormant),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub name: String,
    pub repos: Vec<String>,
    pub status: ProjectStatus,
    pub session_count: i64,
    pub reflex_count: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl Project {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let repos_str: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        Ok(Project {
            project_id: ProjectId::new(row.get::<_, String>(0)?),
            name: row.get(1)?,
            repos: serde_json::from_str(&repos_str).unwrap_or_default(),
            status: ProjectStatus::try_parse(&status_str).unwrap_or(ProjectStatus::Active),
            session_count: row.get(4)?,
            reflex_count: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

const PROJECT_COLUMNS: &str =
    "project_id, name, repos, status, session_count, reflex_count, created_at, updated_at";

impl Database {
    pub fn create_project(&self, name: &str, repos: &[String]) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(EmpiricaError::Validation(
                "Project name must not be empty".to_string(),
            ));
        }

        let project = Project {
            project_id: ProjectId::generate(),
            name: name.to_string(),
            repos: repos.to_vec(),
            status: ProjectStatus::Active,
            session_count: 0,
            reflex_count: 0,
            created_at: now_rfc3339(),
            updated_at: None,
        };

        self.conn()?
            .execute(
                "INSERT INTO projects (project_id, name, repos, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    project.project_id.as_str(),
                    project.name,
                    serde_json::to_string(&project.repos)?,
                    project.created_at,
                ],
            )
            .with_context_fn(|| format!("Failed to insert project '{}'", name))?;

        Ok(project)
    }

    pub fn get_project(&self, project_id: &ProjectId) -> Result<Project> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = ?1"),
            params![project_id.as_str()],
            Project::from_row,
        )
        .optional()
        .with_context("Failed to query project")?
        .ok_or_else(|| EmpiricaError::Validation(format!("Project not found: {}", project_id)))
    }

    pub fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?1"),
            params![name],
            Project::from_row,
        )
        .optional()
        .with_context("Failed to query project by name")
    }

    pub fn list_projects(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>> {
        let conn = self.conn()?;
        let projects = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects WHERE status = ?1 ORDER BY name"
                ))?;
                stmt.query_map(params![status.as_str()], Project::from_row)?
                    .filter_map(|r| log_filter_error(r, "listing projects"))
                    .collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY name"
                ))?;
                stmt.query_map([], Project::from_row)?
                    .filter_map(|r| log_filter_error(r, "listing projects"))
                    .collect()
            }
        };
        Ok(projects)
    }

    pub fn set_project_status(
        &self,
        project_id: &ProjectId,
        status: ProjectStatus,
    ) -> Result<Project> {
        self.conn()?
            .execute(
                "UPDATE projects SET status = ?2, updated_at = ?3 WHERE project_id = ?1",
                params![project_id.as_str(), status.as_str(), now_rfc3339()],
            )
            .with_context("Failed to update project status")?;
        self.get_project(project_id)
    }

    /// Bump the cached reflex counter after a reflex lands in this project.
    pub fn bump_project_reflex_count(&self, project_id: &ProjectId) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE projects SET reflex_count = reflex_count + 1, updated_at = ?2
                 WHERE project_id = ?1",
                params![project_id.as_str(), now_rfc3339()],
            )
            .with_context("Failed to bump project reflex count")?;
        Ok(())
    }

    /// Delete a project. Linked sessions survive with a dangling project_id
    /// cleared to NULL.
    pub fn delete_project(&self, project_id: &ProjectId) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "UPDATE sessions SET project_id = NULL WHERE project_id = ?1",
                params![project_id.as_str()],
            )
            .with_context("Failed to unlink sessions")?;
            let affected = conn
                .execute(
                    "DELETE FROM projects WHERE project_id = ?1",
                    params![project_id.as_str()],
                )
                .with_context("Failed to delete project")?;
            if affected == 0 {
                return Err(EmpiricaError::Validation(format!(
                    "Project not found: {}",
                    project_id
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AiId;

    #[test]
    fn test_project_lifecycle() {
        let db = Database::open_in_memory().expect("open");
        let project = db
            .create_project("empirica", &["github.com/nubaeon/empirica".to_string()])
            .expect("create");

        let loaded = db.get_project(&project.project_id).expect("get");
        assert_eq!(loaded.name, "empirica");
        assert_eq!(loaded.repos.len(), 1);
        assert_eq!(loaded.status, ProjectStatus::Active);

        let archived = db
            .set_project_status(&project.project_id, ProjectStatus::Archived)
            .expect("archive");
        assert_eq!(archived.status, ProjectStatus::Archived);

        let active = db.list_projects(Some(ProjectStatus::Active)).expect("list");
        assert!(active.is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let db = Database::open_in_memory().expect("open");
        db.create_project("demo", &[]).expect("first");
        assert!(db.create_project("demo", &[]).is_err());
    }

    #[test]
    fn test_delete_project_keeps_sessions() {
        let db = Database::open_in_memory().expect("open");
        let project = db.create_project("demo", &[]).expect("project");
        let session = db
            .create_session(
                &AiId::new("agent-A"),
                0,
                Some(&project.project_id),
                None,
                None,
            )
            .expect("session");

        db.delete_project(&project.project_id).expect("delete");

        let survivor = db.get_session(&session.session_id).expect("session lives");
        assert!(survivor.project_id.is_none());
    }

    #[test]
    fn test_session_count_cached() {
        let db = Database::open_in_memory().expect("open");
        let project = db.create_project("demo", &[]).expect("project");
        db.create_session(
            &AiId::new("agent-A"),
            0,
            Some(&project.project_id),
            None,
            None,
        )
        .expect("session");

        let loaded = db.get_project(&project.project_id).expect("get");
        assert_eq!(loaded.session_count, 1);
    }
}
