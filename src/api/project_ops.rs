//! Project operations.

use super::Core;
use crate::store::{Project, ProjectStatus};
use crate::types::{EmpiricaError, ProjectId, Result};

impl Core {
    /// project.create
    pub fn project_create(&self, name: &str, repos: &[String]) -> Result<Project> {
        self.db().create_project(name, repos)
    }

    /// project.get: by id or unique name.
    pub fn project_get(&self, id_or_name: &str) -> Result<Project> {
        if let Some(project) = self.db().find_project_by_name(id_or_name)? {
            return Ok(project);
        }
        self.db().get_project(&ProjectId::new(id_or_name))
    }

    /// project.list
    pub fn project_list(&self, status: Option<&str>) -> Result<Vec<Project>> {
        let status = status
            .map(|s| {
                ProjectStatus::try_parse(s).ok_or_else(|| {
                    EmpiricaError::invalid_field(
                        "status",
                        format!("'{}' is not one of active, dormant, archived", s),
                    )
                })
            })
            .transpose()?;
        self.db().list_projects(status)
    }

    /// project.set_status
    pub fn project_set_status(&self, id_or_name: &str, status: &str) -> Result<Project> {
        let project = self.project_get(id_or_name)?;
        let status = ProjectStatus::try_parse(status).ok_or_else(|| {
            EmpiricaError::invalid_field(
                "status",
                format!("'{}' is not one of active, dormant, archived", status),
            )
        })?;
        self.db().set_project_status(&project.project_id, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::core;

    #[test]
    fn test_project_surface() {
        let (_dir, core) = core();
        let created = core
            .project_create("empirica", &["github.com/nubaeon/empirica".to_string()])
            .expect("create");

        let by_name = core.project_get("empirica").expect("by name");
        assert_eq!(by_name.project_id, created.project_id);

        let by_id = core.project_get(created.project_id.as_str()).expect("by id");
        assert_eq!(by_id.name, "empirica");

        core.project_set_status("empirica", "dormant").expect("status");
        let dormant = core.project_list(Some("dormant")).expect("list");
        assert_eq!(dormant.len(), 1);

        assert!(core.project_set_status("empirica", "asleep").is_err());
        assert!(core.project_get("ghost").is_err());
    }
}
