//! Public operation surface.
//!
//! [`Core`] is the explicit store-and-config handle threaded through every
//! operation; there is no process-wide registry. Each operation consumes a
//! structured request, runs as one atomic unit against the store, and
//! returns a typed response the envelope layer serialises.

pub mod background;
pub mod breadcrumb_ops;
pub mod checkpoint_ops;
pub mod goal_ops;
pub mod identity_ops;
pub mod project_ops;
pub mod reflex_ops;
pub mod session_ops;

pub use background::Workers;
pub use reflex_ops::{CheckRequest, PostflightRequest, PreflightRequest, SubmitResponse};
pub use session_ops::{ResumeMode, ResumeReport};

use std::path::{Path, PathBuf};

use crate::checkpoint::{CheckpointLayer, GitNotes};
use crate::config::{Config, ConfigLoader};
use crate::signing::Keystore;
use crate::store::{Database, SharedDatabase};
use crate::types::{Result, SessionId};

/// The engine's externally held handle: store, config, keystore, and the
/// project the state lives under.
pub struct Core {
    db: SharedDatabase,
    config: Config,
    keystore: Keystore,
    project_root: PathBuf,
    /// Instance suffix for the open-transaction pointer
    instance: Option<String>,
}

impl Core {
    /// Open the core for a project root: merged config, the project's
    /// session store, the user keystore, and the ambient instance id.
    pub fn open(project_root: &Path) -> Result<Self> {
        let config = ConfigLoader::load_for_project(project_root)?;
        let db = Database::open(ConfigLoader::sessions_db_path(project_root))?;
        let keystore = Keystore::default_location()?;
        Ok(Self {
            db: std::sync::Arc::new(db),
            config,
            keystore,
            project_root: project_root.to_path_buf(),
            instance: crate::resolve::instance_id(),
        })
    }

    /// Assemble a core from parts; the seam tests and embedders use.
    pub fn from_parts(
        db: SharedDatabase,
        config: Config,
        keystore: Keystore,
        project_root: PathBuf,
        instance: Option<String>,
    ) -> Self {
        Self {
            db,
            config,
            keystore,
            project_root,
            instance,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn shared_db(&self) -> SharedDatabase {
        self.db.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Resolve a session id, UUID prefix, or alias to a concrete session.
    pub fn resolve_session(&self, id_or_alias: &str) -> Result<SessionId> {
        crate::resolve::resolve(&self.db, id_or_alias)
    }

    /// The project's git-notes handle, unless disabled or outside a repo.
    pub fn git_notes(&self) -> Option<GitNotes> {
        if self.config.git.disabled {
            return None;
        }
        GitNotes::discover(
            &self.project_root,
            &self.config.git.notes_ref,
            self.config.git.command_timeout_secs,
        )
    }

    /// A checkpoint layer bound to this core's store and repository.
    pub fn checkpoints(&self) -> CheckpointLayer<'_> {
        CheckpointLayer::new(&self.db, self.git_notes())
    }

    /// admin.force_close: close transactions open longer than the horizon
    /// by synthesising an abandoned POSTFLIGHT.
    pub fn admin_force_close(&self, horizon_hours: Option<i64>) -> Result<Vec<String>> {
        let horizon =
            horizon_hours.unwrap_or(self.config.background.force_close_horizon_hours);
        let engine = crate::cascade::CascadeEngine::new(&self.db, &self.config);
        Ok(engine
            .force_close_stale(horizon)?
            .into_iter()
            .map(|t| t.into_inner())
            .collect())
    }

    /// admin.reap_contexts: drop stale resolver records.
    pub fn admin_reap_contexts(&self) -> Result<usize> {
        crate::resolve::ResolverIndex::default_location(self.config.resolver.stale_horizon_hours)?
            .reap_stale()
    }

    /// admin.reconcile: retry deferred git-note writes once, synchronously.
    pub fn admin_reconcile(&self) -> Result<usize> {
        self.checkpoints().reconcile(256)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory core with a scratch keystore and no git.
    pub(crate) fn core() -> (tempfile::TempDir, Core) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = std::sync::Arc::new(Database::open_in_memory().expect("db"));
        let mut config = Config::default();
        config.git.disabled = true;
        let keystore = Keystore::new(dir.path().join("keys"));
        let core = Core::from_parts(db, config, keystore, dir.path().to_path_buf(), None);
        (dir, core)
    }
}
