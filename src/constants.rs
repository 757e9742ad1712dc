//! Global Constants
//!
//! Centralized defaults for gates, drift banding, and environment tuning.
//! Deployments may override the configurable values through `Config`; the
//! values here are the documented defaults, never silently changed.

/// Gate thresholds
pub mod gates {
    /// Minimum `know` score for the readiness gate
    pub const TAU_KNOW: f64 = 0.70;

    /// Maximum `uncertainty` score for the readiness gate
    pub const TAU_UNCERTAINTY: f64 = 0.35;

    /// Minimum `engagement` score for PREFLIGHT to recommend proceeding
    pub const ENGAGEMENT_THRESHOLD: f64 = 0.60;
}

/// Tier weights for the composite confidence calculation (sum to 1.0)
pub mod weights {
    pub const FOUNDATION: f64 = 0.35;
    pub const COMPREHENSION: f64 = 0.25;
    pub const EXECUTION: f64 = 0.25;
    pub const ENGAGEMENT: f64 = 0.15;
}

/// Drift detection constants
pub mod drift {
    /// Reflex window for successive-assessment drift
    pub const DEFAULT_WINDOW: usize = 5;

    /// Mean absolute change below this is minor
    pub const MODERATE_THRESHOLD: f64 = 0.30;

    /// Mean absolute change at or above this is severe
    pub const SEVERE_THRESHOLD: f64 = 0.60;
}

/// Calibration constants
pub mod calibration {
    /// Pseudo-count of the Normal prior on the self-vs-grounded gap
    pub const PRIOR_STRENGTH: f64 = 3.0;

    /// Gate offsets are clamped to this magnitude
    pub const MAX_GATE_OFFSET: f64 = 0.15;
}

/// Git checkpoint constants
pub mod git {
    /// Notes ref used for reflex mirrors, distinct from default notes
    pub const NOTES_REF: &str = "refs/notes/empirica/checkpoints";

    /// Timeout for git subprocess calls (seconds)
    pub const COMMAND_TIMEOUT_SECS: u64 = 5;

    /// Canonical serialisation version stamped into every payload
    pub const CANON_VERSION: &str = "v1";
}

/// Session resolver constants
pub mod resolver {
    /// Context records older than this are stale (hours)
    pub const STALE_HORIZON_HOURS: i64 = 4;

    /// Environment variable overriding the derived instance identifier
    pub const INSTANCE_ENV_OVERRIDE: &str = "EMPIRICA_INSTANCE_ID";
}

/// Transaction lifecycle constants
pub mod transactions {
    /// Open transactions older than this may be force-closed (hours)
    pub const FORCE_CLOSE_HORIZON_HOURS: i64 = 72;
}

/// Background worker constants
pub mod background {
    /// Drift sweeper interval (seconds)
    pub const DRIFT_SWEEP_INTERVAL_SECS: u64 = 300;

    /// Checkpoint reconciler interval (seconds)
    pub const RECONCILE_INTERVAL_SECS: u64 = 60;
}
