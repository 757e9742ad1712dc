pub mod envelope;
pub mod error;

pub use error::{EmpiricaError, ErrorKind, Result, ResultExt, log_filter_error};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype! {
    /// Type-safe wrapper for session IDs (128-bit UUID, stored as text).
    ///
    /// Prevents accidental mixing of session IDs with other string types.
    SessionId
}

id_newtype! {
    /// Type-safe wrapper for cascade IDs.
    CascadeId
}

id_newtype! {
    /// Type-safe wrapper for goal IDs.
    GoalId
}

id_newtype! {
    /// Epistemic transaction identifier: groups the reflexes of one
    /// PREFLIGHT-through-POSTFLIGHT pass.
    TransactionId
}

id_newtype! {
    /// Type-safe wrapper for project IDs.
    ProjectId
}

/// Free-form agent identifier, e.g. `"claude-sonnet"`, `"agent-A"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AiId(String);

impl AiId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Reject identifiers that cannot name a keystore file.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(EmpiricaError::invalid_field("ai_id", "must not be empty"));
        }
        if self.0.len() > 128 {
            return Err(EmpiricaError::invalid_field("ai_id", "longer than 128 bytes"));
        }
        if self
            .0
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            return Err(EmpiricaError::invalid_field(
                "ai_id",
                "only alphanumerics, '-', '_', '.', ':' are allowed",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for AiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AiId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AiId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for AiId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod newtype_tests {
    use super::*;

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new("sess-123");
        assert_eq!(id.as_str(), "sess-123");
        assert_eq!(format!("{}", id), "sess-123");
    }

    #[test]
    fn test_generate_is_uuid() {
        let id = SessionId::generate();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_ai_id_validation() {
        assert!(AiId::new("agent-A").validate().is_ok());
        assert!(AiId::new("claude.sonnet:4").validate().is_ok());
        assert!(AiId::new("").validate().is_err());
        assert!(AiId::new("bad/path").validate().is_err());
        assert!(AiId::new("x".repeat(200)).validate().is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let id = TransactionId::new("txn-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"txn-1\"");
        let back: TransactionId = serde_json::from_str("\"txn-1\"").unwrap();
        assert_eq!(back, id);
    }
}
