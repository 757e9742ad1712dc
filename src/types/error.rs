//! Unified Error Type System
//!
//! Centralized error types for the entire engine.
//! Every public operation returns `Result<T, EmpiricaError>`; the CLI and
//! tool-routing layers render errors through the response envelope.
//!
//! ## Error Categories
//!
//! - **Input**: bad data from the caller (correct and retry)
//! - **State**: operation not possible in the current state (query, then retry)
//! - **Integrity**: the data itself is suspect (caller decides escalation)
//! - **System**: transient or environmental (retry after a short delay)

use thiserror::Error;

// =============================================================================
// Error Kinds
// =============================================================================

/// Machine-readable error taxonomy carried on the wire as `error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range submission payload
    InvalidInput,
    /// Session alias that cannot be resolved
    InvalidAlias,
    /// No session matches the identifier
    SessionNotFound,
    /// Operation is not legal in the current CASCADE phase
    IllegalTransition,
    /// Domain-level validation failed (goals, subtasks, projects)
    ValidationError,
    /// Store failure or broken internal invariant
    DatabaseError,
    /// Not enough recorded data to answer
    InsufficientData,
    /// Signature or identity verification failed
    VerificationFailed,
    /// Drift magnitude blocks the requested transition
    SevereDrift,
    /// Git note write was deferred; informational
    GitDeferred,
}

impl ErrorKind {
    /// Wire name used in the `error_type` envelope field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidAlias => "invalid_alias",
            Self::SessionNotFound => "session_not_found",
            Self::IllegalTransition => "illegal_transition",
            Self::ValidationError => "validation_error",
            Self::DatabaseError => "database_error",
            Self::InsufficientData => "insufficient_data",
            Self::VerificationFailed => "verification_failed",
            Self::SevereDrift => "severe_drift",
            Self::GitDeferred => "git_deferred",
        }
    }

    /// Process exit code for the CLI boundary.
    ///
    /// 0 success, 2 validation, 3 illegal transition, 4 store, 5 verification,
    /// 1 everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidInput | Self::InvalidAlias | Self::ValidationError => 2,
            Self::IllegalTransition => 3,
            Self::DatabaseError => 4,
            Self::VerificationFailed => 5,
            _ => 1,
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseError | Self::GitDeferred)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum EmpiricaError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Field or vector that failed, when known
        field: Option<String>,
        reason: String,
    },

    #[error("Cannot resolve alias '{alias}': {reason}")]
    InvalidAlias {
        alias: String,
        reason: String,
        suggestions: Vec<String>,
    },

    #[error("{0}")]
    Validation(String),

    // -------------------------------------------------------------------------
    // State Errors
    // -------------------------------------------------------------------------
    #[error("Session not found: {query}")]
    SessionNotFound {
        query: String,
        suggestions: Vec<String>,
    },

    #[error("Illegal transition: {attempted} while in phase {current}")]
    IllegalTransition {
        /// Current phase of the transaction, e.g. "NEW"
        current: String,
        /// The operation that was attempted
        attempted: String,
        /// Operations that are legal from the current phase
        expected: Vec<String>,
    },

    #[error("Insufficient data for {what}: have {have}, need {needed}")]
    InsufficientData {
        what: String,
        have: usize,
        needed: usize,
    },

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Verification failed: {reason}")]
    VerificationFailed { reason: String },

    #[error("Severe drift detected (magnitude {magnitude:.3}); not safe to proceed")]
    SevereDrift { magnitude: f64 },

    // -------------------------------------------------------------------------
    // Domain / environment
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Git error: {0}")]
    Git(String),
}

impl EmpiricaError {
    /// Classify this error into the wire taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::InvalidAlias { .. } => ErrorKind::InvalidAlias,
            Self::Validation(_) | Self::Config(_) => ErrorKind::ValidationError,
            Self::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            Self::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            Self::SevereDrift { .. } => ErrorKind::SevereDrift,
            Self::Git(_) => ErrorKind::GitDeferred,
            Self::Io(_) | Self::Database(_) | Self::Json(_) | Self::Storage(_) => {
                ErrorKind::DatabaseError
            }
        }
    }

    /// Create an invalid-input error without field context.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: None,
            reason: reason.into(),
        }
    }

    /// Create an invalid-input error for a specific field.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: Some(field.into()),
            reason: reason.into(),
        }
    }

    pub fn session_not_found(query: impl Into<String>) -> Self {
        Self::SessionNotFound {
            query: query.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn verification_failed(reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Human-readable hint about the next thing to try.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::IllegalTransition { expected, .. } if !expected.is_empty() => Some(format!(
                "Legal operations from here: {}",
                expected.join(", ")
            )),
            Self::SessionNotFound { suggestions, .. } if !suggestions.is_empty() => {
                Some(format!("Closest sessions: {}", suggestions.join(", ")))
            }
            Self::InvalidAlias { suggestions, .. } if !suggestions.is_empty() => {
                Some(format!("Did you mean: {}", suggestions.join(", ")))
            }
            Self::SevereDrift { .. } => {
                Some("Submit another CHECK after re-grounding your assessment".to_string())
            }
            Self::InsufficientData { .. } => {
                Some("Record more reflexes before requesting this analysis".to_string())
            }
            _ => None,
        }
    }

    /// Concrete operations the caller can run to recover.
    pub fn recovery_commands(&self) -> Vec<String> {
        match self {
            Self::IllegalTransition { expected, .. } => expected.clone(),
            Self::SessionNotFound { .. } => {
                vec!["session.list".to_string(), "session.create".to_string()]
            }
            Self::SevereDrift { .. } => vec!["reflex.submit_check".to_string()],
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EmpiricaError>;

// =============================================================================
// Context Helpers
// =============================================================================

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| EmpiricaError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| EmpiricaError::Storage(format!("{}: {}", f().into(), e)))
    }
}

/// Log and drop row-mapping errors while iterating query results.
///
/// SQLite row errors mid-iteration indicate corruption; surfacing them as a
/// warning keeps bulk reads usable while making the corruption visible.
pub fn log_filter_error<T, E: std::fmt::Display>(
    result: std::result::Result<T, E>,
    what: &str,
) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Skipping corrupt row while {}: {}", what, e);
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
