//! Identity metadata repository.
//!
//! Public keys and fingerprints live here for verification; private keys
//! never enter the database (see the signing keystore).

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::types::{AiId, EmpiricaError, Result, ResultExt, log_filter_error};

/// Public half of an Ed25519 identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub ai_id: AiId,
    /// base64url raw 32-byte public key
    pub public_key: String,
    /// hex SHA-256 of the raw public key
    pub fingerprint: String,
    pub created_at: String,
}

impl IdentityRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(IdentityRecord {
            ai_id: AiId::new(row.get::<_, String>(0)?),
            public_key: row.get(1)?,
            fingerprint: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl Database {
    /// Register a public key for an agent. Rejected when the agent already
    /// has a different key; re-registering the same key is a no-op.
    pub fn register_identity(
        &self,
        ai_id: &AiId,
        public_key: &str,
        fingerprint: &str,
    ) -> Result<IdentityRecord> {
        ai_id.validate()?;

        if let Some(existing) = self.get_identity(ai_id)? {
            if existing.fingerprint == fingerprint {
                return Ok(existing);
            }
            return Err(EmpiricaError::Validation(format!(
                "Identity for {} already registered with fingerprint {}",
                ai_id, existing.fingerprint
            )));
        }

        let record = IdentityRecord {
            ai_id: ai_id.clone(),
            public_key: public_key.to_string(),
            fingerprint: fingerprint.to_string(),
            created_at: now_rfc3339(),
        };

        self.conn()?
            .execute(
                "INSERT INTO identities (ai_id, public_key, fingerprint, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.ai_id.as_str(),
                    record.public_key,
                    record.fingerprint,
                    record.created_at,
                ],
            )
            .with_context("Failed to insert identity")?;

        Ok(record)
    }

    /// Replace any registered key for an agent; used on explicit overwrite.
    pub fn replace_identity(
        &self,
        ai_id: &AiId,
        public_key: &str,
        fingerprint: &str,
    ) -> Result<IdentityRecord> {
        ai_id.validate()?;
        let created_at = now_rfc3339();
        self.conn()?
            .execute(
                "INSERT INTO identities (ai_id, public_key, fingerprint, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(ai_id) DO UPDATE SET
                     public_key = excluded.public_key,
                     fingerprint = excluded.fingerprint,
                     created_at = excluded.created_at",
                params![ai_id.as_str(), public_key, fingerprint, created_at],
            )
            .with_context("Failed to replace identity")?;
        Ok(IdentityRecord {
            ai_id: ai_id.clone(),
            public_key: public_key.to_string(),
            fingerprint: fingerprint.to_string(),
            created_at,
        })
    }

    pub fn get_identity(&self, ai_id: &AiId) -> Result<Option<IdentityRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT ai_id, public_key, fingerprint, created_at FROM identities WHERE ai_id = ?1",
            params![ai_id.as_str()],
            IdentityRecord::from_row,
        )
        .optional()
        .with_context("Failed to query identity")
    }

    pub fn list_identities(&self) -> Result<Vec<IdentityRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ai_id, public_key, fingerprint, created_at FROM identities ORDER BY ai_id",
        )?;
        let identities = stmt
            .query_map([], IdentityRecord::from_row)?
            .filter_map(|r| log_filter_error(r, "listing identities"))
            .collect();
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_idempotence() {
        let db = Database::open_in_memory().expect("open");
        let ai = AiId::new("auditor");

        let first = db
            .register_identity(&ai, "pubkey-b64", "fingerprint-hex")
            .expect("register");
        let again = db
            .register_identity(&ai, "pubkey-b64", "fingerprint-hex")
            .expect("idempotent");
        assert_eq!(first.created_at, again.created_at);

        let conflict = db.register_identity(&ai, "other-key", "other-fingerprint");
        assert!(conflict.is_err());
    }

    #[test]
    fn test_list() {
        let db = Database::open_in_memory().expect("open");
        db.register_identity(&AiId::new("b"), "k1", "f1").expect("b");
        db.register_identity(&AiId::new("a"), "k2", "f2").expect("a");

        let all = db.list_identities().expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].ai_id.as_str(), "a");
    }
}
