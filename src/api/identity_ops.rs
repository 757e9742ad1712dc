//! Identity operations: create, list, export, verify.

use serde::Serialize;

use super::Core;
use crate::store::IdentityRecord;
use crate::types::{AiId, EmpiricaError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct IdentityResponse {
    pub ai_id: String,
    pub public_key: String,
    pub fingerprint: String,
    pub created_at: String,
}

impl Core {
    /// identity.create: idempotent unless `overwrite`.
    pub fn identity_create(&self, ai_id: &str, overwrite: bool) -> Result<IdentityResponse> {
        let ai = AiId::new(ai_id);
        let identity = self.keystore().create_identity(&ai, overwrite)?;
        // Registration makes the public key discoverable by verifiers; an
        // overwrite must not leave the old key registered.
        if overwrite {
            self.db().replace_identity(
                &ai,
                &identity.public_key_b64(),
                &identity.fingerprint(),
            )?;
        } else {
            self.db().register_identity(
                &ai,
                &identity.public_key_b64(),
                &identity.fingerprint(),
            )?;
        }
        Ok(IdentityResponse {
            ai_id: ai_id.to_string(),
            public_key: identity.public_key_b64(),
            fingerprint: identity.fingerprint(),
            created_at: identity.created_at,
        })
    }

    /// identity.list: the registered public identities.
    pub fn identity_list(&self) -> Result<Vec<IdentityRecord>> {
        self.db().list_identities()
    }

    /// identity.export: the public key other agents verify with.
    pub fn identity_export(&self, ai_id: &str) -> Result<IdentityResponse> {
        let ai = AiId::new(ai_id);
        let record = self.db().get_identity(&ai)?.ok_or_else(|| {
            EmpiricaError::verification_failed(format!("no registered identity for {}", ai_id))
        })?;
        Ok(IdentityResponse {
            ai_id: record.ai_id.into_inner(),
            public_key: record.public_key,
            fingerprint: record.fingerprint,
            created_at: record.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::core;

    #[test]
    fn test_create_idempotent_and_export() {
        let (_dir, core) = core();

        let first = core.identity_create("auditor", false).expect("create");
        let again = core.identity_create("auditor", false).expect("idempotent");
        assert_eq!(first.fingerprint, again.fingerprint);

        let exported = core.identity_export("auditor").expect("export");
        assert_eq!(exported.fingerprint, first.fingerprint);

        let all = core.identity_list().expect("list");
        assert_eq!(all.len(), 1);

        let err = core.identity_export("ghost").unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::VerificationFailed);
    }

    #[test]
    fn test_overwrite_rotates_registration() {
        let (_dir, core) = core();
        let first = core.identity_create("auditor", false).expect("create");
        let rotated = core.identity_create("auditor", true).expect("rotate");
        assert_ne!(first.fingerprint, rotated.fingerprint);

        let exported = core.identity_export("auditor").expect("export");
        assert_eq!(exported.fingerprint, rotated.fingerprint);
    }
}
