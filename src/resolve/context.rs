//! Active-context files.
//!
//! Two indexes under the user state directory tie ambient context to work:
//! `tty_sessions/<tty>.json` and `instance_projects/<instance>.json`. The
//! instance file is authoritative; a disagreeing TTY file is corrected.
//! The open-transaction pointer lives under the project's own state
//! directory with an instance suffix. All writes are temp-file + atomic
//! rename; records go stale after the configured horizon or when their TTY
//! device disappears.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use super::instance::tty_device_exists;
use crate::types::{EmpiricaError, Result, ResultExt};

/// Record in the TTY-keyed index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtyContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_conversation_id: Option<String>,
    pub session_id: String,
    pub project_path: String,
    pub timestamp: String,
}

/// Record in the instance-keyed index (authoritative).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceContext {
    pub project_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: String,
}

/// Open-transaction pointer under the project state directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTransaction {
    pub session_id: String,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade_id: Option<String>,
    pub timestamp: String,
}

/// The resolver's on-disk indexes.
pub struct ResolverIndex {
    base_dir: PathBuf,
    stale_horizon_hours: i64,
}

impl ResolverIndex {
    pub fn new(base_dir: impl Into<PathBuf>, stale_horizon_hours: i64) -> Self {
        Self {
            base_dir: base_dir.into(),
            stale_horizon_hours,
        }
    }

    /// Index rooted at the user state directory.
    pub fn default_location(stale_horizon_hours: i64) -> Result<Self> {
        let base = crate::config::ConfigLoader::user_state_dir().ok_or_else(|| {
            EmpiricaError::Config("Cannot locate user state directory (HOME unset)".to_string())
        })?;
        Ok(Self::new(base, stale_horizon_hours))
    }

    fn tty_path(&self, tty: &str) -> PathBuf {
        self.base_dir.join("tty_sessions").join(format!("{}.json", tty))
    }

    fn instance_path(&self, instance: &str) -> PathBuf {
        self.base_dir
            .join("instance_projects")
            .join(format!("{}.json", instance))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn record_tty(&self, tty: &str, context: &TtyContext) -> Result<()> {
        write_atomic(&self.tty_path(tty), context)
    }

    pub fn record_instance(&self, instance: &str, context: &InstanceContext) -> Result<()> {
        write_atomic(&self.instance_path(instance), context)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn read_tty(&self, tty: &str) -> Result<Option<TtyContext>> {
        let context: Option<TtyContext> = read_json(&self.tty_path(tty))?;
        let Some(context) = context else {
            return Ok(None);
        };
        if self.is_stale(&context.timestamp, Some(tty)) {
            tracing::debug!("Ignoring stale TTY context for {}", tty);
            return Ok(None);
        }
        Ok(Some(context))
    }

    pub fn read_instance(&self, instance: &str) -> Result<Option<InstanceContext>> {
        let context: Option<InstanceContext> = read_json(&self.instance_path(instance))?;
        let Some(context) = context else {
            return Ok(None);
        };
        if self.is_stale(&context.timestamp, None) {
            tracing::debug!("Ignoring stale instance context for {}", instance);
            return Ok(None);
        }
        Ok(Some(context))
    }

    /// Resolve the active project path: instance file → TTY file → error.
    /// Never falls back to the current working directory. A TTY record that
    /// disagrees with the authoritative instance record is corrected.
    pub fn active_project_path(
        &self,
        instance: Option<&str>,
        tty: Option<&str>,
    ) -> Result<PathBuf> {
        if let Some(instance) = instance
            && let Some(context) = self.read_instance(instance)?
        {
            if let Some(tty) = tty
                && let Some(tty_context) = self.read_tty(tty)?
                && tty_context.project_path != context.project_path
            {
                tracing::warn!(
                    "TTY context disagrees with instance context; correcting {} -> {}",
                    tty_context.project_path,
                    context.project_path
                );
                self.record_tty(
                    tty,
                    &TtyContext {
                        project_path: context.project_path.clone(),
                        ..tty_context
                    },
                )?;
            }
            return Ok(PathBuf::from(context.project_path));
        }

        if let Some(tty) = tty
            && let Some(context) = self.read_tty(tty)?
        {
            return Ok(PathBuf::from(context.project_path));
        }

        Err(EmpiricaError::Config(
            "No active project context for this instance or TTY; \
             run session.create from the project first"
                .to_string(),
        ))
    }

    /// Resolve the active session id: open-transaction file → TTY file →
    /// instance file.
    pub fn active_session_id(
        &self,
        project_root: Option<&Path>,
        instance: Option<&str>,
        tty: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(root) = project_root
            && let Some(txn) = read_active_transaction(root, instance)?
        {
            return Ok(Some(txn.session_id));
        }
        if let Some(tty) = tty
            && let Some(context) = self.read_tty(tty)?
        {
            return Ok(Some(context.session_id));
        }
        if let Some(instance) = instance
            && let Some(context) = self.read_instance(instance)?
            && let Some(session_id) = context.session_id
        {
            return Ok(Some(session_id));
        }
        Ok(None)
    }

    /// Remove stale records from both indexes. Returns how many were reaped.
    pub fn reap_stale(&self) -> Result<usize> {
        let mut reaped = 0;
        for (dir, is_tty) in [
            (self.base_dir.join("tty_sessions"), true),
            (self.base_dir.join("instance_projects"), false),
        ] {
            if !dir.exists() {
                continue;
            }
            for entry in std::fs::read_dir(&dir).with_context("Failed to scan context index")? {
                let entry = entry.with_context("Failed to read context entry")?;
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let timestamp = read_json::<serde_json::Value>(&path)?
                    .and_then(|v| v.get("timestamp").and_then(|t| t.as_str()).map(str::to_string));
                let stale = match timestamp {
                    Some(ts) => self.is_stale(&ts, is_tty.then_some(stem)),
                    None => true,
                };
                if stale {
                    std::fs::remove_file(&path)
                        .with_context_fn(|| format!("Failed to reap {}", path.display()))?;
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }

    fn is_stale(&self, timestamp: &str, tty: Option<&str>) -> bool {
        if let Some(tty) = tty
            && !tty_device_exists(tty)
        {
            return true;
        }
        match chrono::DateTime::parse_from_rfc3339(timestamp) {
            Ok(ts) => {
                let age = chrono::Utc::now().signed_duration_since(ts);
                age > chrono::Duration::hours(self.stale_horizon_hours)
            }
            Err(_) => true,
        }
    }
}

// =============================================================================
// Open-transaction pointer
// =============================================================================

fn transaction_file(project_root: &Path, instance: Option<&str>) -> PathBuf {
    let suffix = instance.unwrap_or("default");
    project_root
        .join(".empirica")
        .join(format!("active_transaction_{}.json", suffix))
}

pub fn write_active_transaction(
    project_root: &Path,
    instance: Option<&str>,
    txn: &ActiveTransaction,
) -> Result<()> {
    write_atomic(&transaction_file(project_root, instance), txn)
}

pub fn read_active_transaction(
    project_root: &Path,
    instance: Option<&str>,
) -> Result<Option<ActiveTransaction>> {
    read_json(&transaction_file(project_root, instance))
}

pub fn clear_active_transaction(project_root: &Path, instance: Option<&str>) -> Result<()> {
    let path = transaction_file(project_root, instance);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EmpiricaError::Io(e)),
    }
}

// =============================================================================
// Atomic file helpers
// =============================================================================

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| EmpiricaError::Config(format!("No parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)
        .with_context_fn(|| format!("Failed to create {}", parent.display()))?;

    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("ctx"),
        std::process::id()
    ));
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, body)
        .with_context_fn(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context_fn(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EmpiricaError::Io(e)),
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!("Ignoring corrupt context file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}
