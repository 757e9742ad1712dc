//! Signing and identity: Ed25519 keypairs per agent, canonical JSON v1,
//! detached signatures, verification.

pub mod canonical;
pub mod identity;
pub mod signature;

pub use canonical::{canonicalize, content_hash, reflex_canonical};
pub use identity::{Identity, Keystore, export_public_key, fingerprint, import_public_key};
pub use signature::{SignatureBlock, Verification, sign, sign_with_trace, verify};
