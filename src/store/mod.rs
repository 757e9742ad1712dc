//! Session Store
//!
//! SQLite-backed repositories for sessions, cascades, reflexes, goals,
//! breadcrumbs, projects, identities, calibration, and the checkpoint
//! mirror. Each externally observable operation is one atomic transaction;
//! reflexes and checkpoints are append-only.

pub mod breadcrumbs;
pub mod calibration;
pub mod cascades;
pub mod checkpoints;
pub mod database;
pub mod goals;
pub mod identities;
pub mod projects;
pub mod reflexes;
pub mod sessions;

pub use breadcrumbs::{Breadcrumb, BreadcrumbKind, BreadcrumbLinks};
pub use calibration::{CalibrationPoint, CalibrationState, CalibrationTrack};
pub use cascades::Cascade;
pub use checkpoints::{DeferredNote, StoredCheckpoint};
pub use database::{Database, PoolConfig, SharedDatabase};
pub use goals::{Goal, GoalProgress, GoalStatus, Importance, Subtask};
pub use identities::IdentityRecord;
pub use projects::{Project, ProjectStatus};
pub use reflexes::{NewReflex, Reflex, ReflexSignerFn};
pub use sessions::{Handoff, Session};

/// Current UTC time in the RFC 3339 form all tables use.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
