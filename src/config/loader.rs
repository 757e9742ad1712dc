//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/empirica/config.toml)
//! 3. Project config (.empirica/config.toml)
//! 4. Environment variables (EMPIRICA_* prefix)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Config;
use crate::types::{EmpiricaError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_for_project(Path::new("."))
    }

    /// Load configuration resolving the project config under `project_root`.
    pub fn load_for_project(project_root: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path(project_root);
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // e.g. EMPIRICA_GATES_TAU_KNOW -> gates.tau_know
        figment = figment.merge(Env::prefixed("EMPIRICA_").split("_").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| EmpiricaError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| EmpiricaError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/empirica/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("empirica"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Per-project config file: `.empirica/config.toml`
    pub fn project_config_path(project_root: &Path) -> PathBuf {
        project_root.join(".empirica").join("config.toml")
    }

    /// Per-project state directory: `.empirica/`
    pub fn project_state_dir(project_root: &Path) -> PathBuf {
        project_root.join(".empirica")
    }

    /// Per-project database path: `.empirica/sessions/sessions.db`
    pub fn sessions_db_path(project_root: &Path) -> PathBuf {
        Self::project_state_dir(project_root)
            .join("sessions")
            .join("sessions.db")
    }

    /// User-level state directory (~/.empirica), shared by the resolver indexes.
    pub fn user_state_dir() -> Option<PathBuf> {
        env::var("EMPIRICA_STATE_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| env::var("HOME").ok().map(|h| PathBuf::from(h).join(".empirica")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gates]\ntau_know = 0.8\n").expect("write config");

        let config = ConfigLoader::load_from_file(&path).expect("load");
        assert_eq!(config.gates.tau_know, 0.8);
        // Untouched values keep their defaults
        assert_eq!(config.gates.tau_uncertainty, 0.35);
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[drift]\nwindow = 1\n").expect("write config");

        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_project_paths() {
        let root = Path::new("/work/repo");
        assert_eq!(
            ConfigLoader::sessions_db_path(root),
            PathBuf::from("/work/repo/.empirica/sessions/sessions.db")
        );
        assert_eq!(
            ConfigLoader::project_config_path(root),
            PathBuf::from("/work/repo/.empirica/config.toml")
        );
    }
}
