//! Empirica - Metacognitive State Engine for AI Agents
//!
//! A durable, auditable record of an agent's self-assessed epistemic state
//! across the CASCADE workflow (PREFLIGHT → CHECK* → ACT → POSTFLIGHT),
//! together with the rules that gate progress through it.
//!
//! ## Core Features
//!
//! - **Thirteen-vector epistemic model**: tiered composite confidence and
//!   per-vector learning deltas
//! - **CASCADE engine**: phase state machine with engagement and readiness
//!   gates; illegal transitions never produce state
//! - **Durable store**: SQLite sessions/cascades/reflexes/goals/breadcrumbs
//!   with append-only reflex history
//! - **Git-note checkpoints**: compressed reflex mirrors on HEAD, readable
//!   by any agent cloning the repository
//! - **Drift & calibration**: successive-assessment divergence plus
//!   grounded-vs-self calibration tracking per agent
//! - **Signed assessments**: Ed25519 identities and tamper-evident
//!   checkpoints
//!
//! The core validates, records, and gates; it performs no investigation,
//! reasoning, or generation itself.
//!
//! ## Quick Start
//!
//! ```ignore
//! use empirica::api::{Core, PreflightRequest};
//!
//! let core = Core::open(std::path::Path::new("."))?;
//! let session = core.session_create(&request)?;
//! let outcome = core.submit_preflight(&PreflightRequest { .. })?;
//! ```
//!
//! ## Modules
//!
//! - [`vectors`]: the 13-vector model, gates, and the assessment validator
//! - [`cascade`]: phase state machine and the persistence-aware engine
//! - [`store`]: SQLite repositories with pooling and migrations
//! - [`checkpoint`]: git-notes mirror with SQLite fallback
//! - [`drift`]: drift classification and grounded calibration
//! - [`signing`]: Ed25519 identities, canonical JSON, verification
//! - [`resolve`]: instance/TTY context and session aliases
//! - [`api`]: the public operation surface

pub mod api;
pub mod cascade;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod constants;
pub mod drift;
pub mod resolve;
pub mod signing;
pub mod store;
pub mod types;
pub mod vectors;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use api::Core;
pub use config::{Config, ConfigLoader};
pub use types::{EmpiricaError, ErrorKind, Result, ResultExt};

pub use store::{Database, PoolConfig, SharedDatabase};

pub use cascade::{CascadeEngine, CheckDecision, Phase, TransactionState};
pub use vectors::{Assessment, Vector, VectorDelta, VectorMap};
