//! Configuration Types
//!
//! All configuration structures with documented defaults.
//! Supports global (~/.config/empirica/) and project (.empirica/) level
//! configuration. Threshold overrides are deployment-visible here; the
//! engine never changes a gate silently.

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Gate thresholds
    pub gates: GateConfig,

    /// Drift detector settings
    pub drift: DriftConfig,

    /// Git checkpoint settings
    pub git: GitConfig,

    /// Session resolver settings
    pub resolver: ResolverConfig,

    /// Background worker settings
    pub background: BackgroundConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            gates: GateConfig::default(),
            drift: DriftConfig::default(),
            git: GitConfig::default(),
            resolver: ResolverConfig::default(),
            background: BackgroundConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `EmpiricaError::Config` on validation failure.
    pub fn validate(&self) -> crate::types::Result<()> {
        for (name, value) in [
            ("gates.tau_know", self.gates.tau_know),
            ("gates.tau_uncertainty", self.gates.tau_uncertainty),
            ("gates.engagement_threshold", self.gates.engagement_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(crate::types::EmpiricaError::Config(format!(
                    "{} must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }

        if self.drift.window < 2 {
            return Err(crate::types::EmpiricaError::Config(
                "drift.window must be at least 2".to_string(),
            ));
        }
        if self.drift.moderate_threshold >= self.drift.severe_threshold {
            return Err(crate::types::EmpiricaError::Config(format!(
                "drift.moderate_threshold ({}) must be below drift.severe_threshold ({})",
                self.drift.moderate_threshold, self.drift.severe_threshold
            )));
        }

        if self.git.command_timeout_secs == 0 {
            return Err(crate::types::EmpiricaError::Config(
                "git.command_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !self.git.notes_ref.starts_with("refs/notes/") {
            return Err(crate::types::EmpiricaError::Config(format!(
                "git.notes_ref must live under refs/notes/, got '{}'",
                self.git.notes_ref
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Gate Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Readiness gate: minimum `know`
    pub tau_know: f64,

    /// Readiness gate: maximum `uncertainty`
    pub tau_uncertainty: f64,

    /// Engagement gate at PREFLIGHT
    pub engagement_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tau_know: constants::gates::TAU_KNOW,
            tau_uncertainty: constants::gates::TAU_UNCERTAINTY,
            engagement_threshold: constants::gates::ENGAGEMENT_THRESHOLD,
        }
    }
}

// =============================================================================
// Drift Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Number of trailing reflexes compared
    pub window: usize,

    /// Mean absolute change at or above this is moderate
    pub moderate_threshold: f64,

    /// Mean absolute change at or above this is severe
    pub severe_threshold: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window: constants::drift::DEFAULT_WINDOW,
            moderate_threshold: constants::drift::MODERATE_THRESHOLD,
            severe_threshold: constants::drift::SEVERE_THRESHOLD,
        }
    }
}

// =============================================================================
// Git Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Notes ref used for reflex checkpoints
    pub notes_ref: String,

    /// Git subprocess timeout (seconds)
    pub command_timeout_secs: u64,

    /// Disable the git mirror entirely (SQLite remains source of truth)
    pub disabled: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            notes_ref: constants::git::NOTES_REF.to_string(),
            command_timeout_secs: constants::git::COMMAND_TIMEOUT_SECS,
            disabled: false,
        }
    }
}

// =============================================================================
// Resolver Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Context records older than this are stale (hours)
    pub stale_horizon_hours: i64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stale_horizon_hours: constants::resolver::STALE_HORIZON_HOURS,
        }
    }
}

// =============================================================================
// Background Workers
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Run the periodic drift sweeper
    pub drift_sweeper: bool,

    /// Drift sweeper interval (seconds)
    pub drift_sweep_interval_secs: u64,

    /// Run the checkpoint reconciler for deferred git notes
    pub checkpoint_reconciler: bool,

    /// Reconciler interval (seconds)
    pub reconcile_interval_secs: u64,

    /// Open transactions older than this may be force-closed (hours)
    pub force_close_horizon_hours: i64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            drift_sweeper: false,
            drift_sweep_interval_secs: constants::background::DRIFT_SWEEP_INTERVAL_SECS,
            checkpoint_reconciler: false,
            reconcile_interval_secs: constants::background::RECONCILE_INTERVAL_SECS,
            force_close_horizon_hours: constants::transactions::FORCE_CLOSE_HORIZON_HOURS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_documented_values() {
        let config = Config::default();
        assert_eq!(config.gates.tau_know, 0.70);
        assert_eq!(config.gates.tau_uncertainty, 0.35);
        assert_eq!(config.gates.engagement_threshold, 0.60);
        assert_eq!(config.drift.window, 5);
        assert_eq!(config.git.command_timeout_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_gate() {
        let mut config = Config::default();
        config.gates.tau_know = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_drift_bands() {
        let mut config = Config::default();
        config.drift.moderate_threshold = 0.7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_foreign_notes_ref() {
        let mut config = Config::default();
        config.git.notes_ref = "refs/heads/main".to_string();
        assert!(config.validate().is_err());
    }
}
