//! Detached Ed25519 signatures over canonical reflex payloads.
//!
//! Signatures never gate transitions; an unsigned reflex is valid. A failed
//! verification is always surfaced with its reason.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};

use super::canonical;
use super::identity::{Identity, fingerprint, import_public_key};
use crate::constants::git::CANON_VERSION;
use crate::types::{EmpiricaError, Result};

/// Signature block stored alongside a reflex and inside its git note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureBlock {
    /// Canonicalisation version the signature was computed over
    pub canon: String,
    /// Raw 64-byte Ed25519 signature, base64url unpadded
    pub signature: String,
    /// Signer public key, base64url unpadded
    pub public_key: String,
    /// Hex SHA-256 of the raw public key
    pub fingerprint: String,
    /// Checkpoint-chain hash folded into the signed payload, kept here so
    /// verifiers can recompute the exact canonical bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade_trace_hash: Option<String>,
}

/// Result of a clean verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub fingerprint: String,
    /// Hex SHA-256 of the canonical bytes that verified
    pub canonical_hash: String,
}

/// Sign canonical bytes with an identity's private key.
pub fn sign(identity: &Identity, canonical: &str) -> SignatureBlock {
    sign_with_trace(identity, canonical, None)
}

/// Sign canonical bytes, recording the trace hash the payload embedded.
pub fn sign_with_trace(
    identity: &Identity,
    canonical: &str,
    cascade_trace_hash: Option<String>,
) -> SignatureBlock {
    let signature = identity.signing_key().sign(canonical.as_bytes());
    SignatureBlock {
        canon: CANON_VERSION.to_string(),
        signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        public_key: identity.public_key_b64(),
        fingerprint: identity.fingerprint(),
        cascade_trace_hash,
    }
}

/// Verify a signature block against canonical bytes.
///
/// Fails closed with a reason:
/// - `unsupported canon version` for a future canonicalisation
/// - `key mismatch` when the embedded key does not match its fingerprint or
///   the expected registered fingerprint
/// - `invalid signature` when the bytes were tampered with or signed by a
///   different key
pub fn verify(
    block: &SignatureBlock,
    canonical: &str,
    expected_fingerprint: Option<&str>,
) -> Result<Verification> {
    if block.canon != CANON_VERSION {
        return Err(EmpiricaError::verification_failed(format!(
            "unsupported canon version '{}'",
            block.canon
        )));
    }

    let public_key = import_public_key(&block.public_key)?;

    let computed_fingerprint = fingerprint(&public_key);
    if computed_fingerprint != block.fingerprint {
        return Err(EmpiricaError::verification_failed(
            "key mismatch: embedded public key does not match its fingerprint",
        ));
    }
    if let Some(expected) = expected_fingerprint
        && expected != computed_fingerprint
    {
        return Err(EmpiricaError::verification_failed(format!(
            "key mismatch: signed by {}, expected {}",
            computed_fingerprint, expected
        )));
    }

    let raw: [u8; 64] = URL_SAFE_NO_PAD
        .decode(&block.signature)
        .map_err(|e| EmpiricaError::verification_failed(format!("malformed signature: {}", e)))?
        .try_into()
        .map_err(|_| EmpiricaError::verification_failed("signature must be 64 bytes"))?;
    let signature = ed25519_dalek::Signature::from_bytes(&raw);

    public_key
        .verify(canonical.as_bytes(), &signature)
        .map_err(|_| EmpiricaError::verification_failed("invalid signature: payload tampered or wrong key"))?;

    Ok(Verification {
        fingerprint: computed_fingerprint,
        canonical_hash: canonical::content_hash(canonical),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::identity::Keystore;
    use crate::types::AiId;

    fn make_identity() -> Identity {
        let dir = tempfile::tempdir().expect("tempdir");
        let keystore = Keystore::new(dir.path());
        keystore
            .create_identity(&AiId::new("auditor"), false)
            .expect("identity")
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let identity = make_identity();
        let canonical = r#"{"canon":"v1","round":1}"#;

        let block = sign(&identity, canonical);
        let verification = verify(&block, canonical, None).expect("verify");
        assert_eq!(verification.fingerprint, identity.fingerprint());
        assert_eq!(
            verification.canonical_hash,
            canonical::content_hash(canonical)
        );
    }

    #[test]
    fn test_tampered_payload_fails() {
        let identity = make_identity();
        let canonical = r#"{"canon":"v1","know":0.6}"#;
        let block = sign(&identity, canonical);

        let tampered = r#"{"canon":"v1","know":0.7}"#;
        let err = verify(&block, tampered, None).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::VerificationFailed);
        assert!(err.to_string().contains("invalid signature"));
    }

    #[test]
    fn test_wrong_expected_fingerprint_fails() {
        let identity = make_identity();
        let canonical = r#"{"canon":"v1"}"#;
        let block = sign(&identity, canonical);

        let err = verify(&block, canonical, Some("deadbeef")).unwrap_err();
        assert!(err.to_string().contains("key mismatch"));
    }

    #[test]
    fn test_swapped_public_key_fails() {
        let identity = make_identity();
        let other = make_identity();
        let canonical = r#"{"canon":"v1"}"#;

        let mut block = sign(&identity, canonical);
        // Swap in another key with a consistent fingerprint: the signature
        // itself no longer verifies.
        block.public_key = other.public_key_b64();
        block.fingerprint = other.fingerprint();

        let err = verify(&block, canonical, None).unwrap_err();
        assert!(err.to_string().contains("invalid signature"));
    }

    #[test]
    fn test_future_canon_version_rejected() {
        let identity = make_identity();
        let canonical = r#"{"canon":"v2"}"#;
        let mut block = sign(&identity, canonical);
        block.canon = "v2".to_string();

        let err = verify(&block, canonical, None).unwrap_err();
        assert!(err.to_string().contains("canon version"));
    }
}
