//! Ed25519 identity keystore.
//!
//! One keypair per `ai_id`. The private key lives only in a 0o600 file
//! under the user keystore directory; the public key and fingerprint are
//! registered in the store for verification by other agents.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{AiId, EmpiricaError, Result, ResultExt};

/// Hex SHA-256 of a raw 32-byte public key.
pub fn fingerprint(public_key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(public_key.as_bytes()))
}

/// Base64url (unpadded) of the raw public key, the export wire form.
pub fn export_public_key(public_key: &VerifyingKey) -> String {
    URL_SAFE_NO_PAD.encode(public_key.as_bytes())
}

/// Decode an exported public key.
pub fn import_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes: [u8; 32] = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| EmpiricaError::verification_failed(format!("malformed public key: {}", e)))?
        .try_into()
        .map_err(|_| EmpiricaError::verification_failed("public key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| EmpiricaError::verification_failed(format!("invalid public key: {}", e)))
}

/// On-disk key file contents. The secret never leaves this module in
/// plaintext form.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    ai_id: String,
    secret_key: String,
    public_key: String,
    created_at: String,
}

/// An agent identity loaded into memory. The seed is zeroised on drop.
#[derive(Debug)]
pub struct Identity {
    pub ai_id: AiId,
    seed: SecretBox<[u8; 32]>,
    pub verifying_key: VerifyingKey,
    pub created_at: String,
}

impl Identity {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.verifying_key)
    }

    pub fn public_key_b64(&self) -> String {
        export_public_key(&self.verifying_key)
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(self.seed.expose_secret())
    }
}

/// Filesystem keystore rooted at `<user state dir>/keys/`.
pub struct Keystore {
    root: PathBuf,
}

impl Keystore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default keystore under the user state directory.
    pub fn default_location() -> Result<Self> {
        let base = crate::config::ConfigLoader::user_state_dir().ok_or_else(|| {
            EmpiricaError::Config("Cannot locate user state directory (HOME unset)".to_string())
        })?;
        Ok(Self::new(base.join("keys")))
    }

    fn key_path(&self, ai_id: &AiId) -> PathBuf {
        self.root.join(format!("{}.key", ai_id))
    }

    /// Create an identity for `ai_id`.
    ///
    /// With `overwrite = false` this is idempotent: an existing identity is
    /// returned unchanged. With `overwrite = true` a fresh keypair replaces
    /// the old one.
    pub fn create_identity(&self, ai_id: &AiId, overwrite: bool) -> Result<Identity> {
        ai_id.validate()?;
        let path = self.key_path(ai_id);

        if path.exists() && !overwrite {
            return self.load_identity(ai_id);
        }

        std::fs::create_dir_all(&self.root)
            .with_context_fn(|| format!("Failed to create keystore {}", self.root.display()))?;

        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let created_at = chrono::Utc::now().to_rfc3339();

        let contents = serde_json::to_string_pretty(&KeyFile {
            ai_id: ai_id.as_str().to_string(),
            secret_key: URL_SAFE_NO_PAD.encode(signing_key.to_bytes()),
            public_key: export_public_key(&verifying_key),
            created_at: created_at.clone(),
        })?;

        write_key_file(&path, contents.as_bytes(), overwrite)?;

        tracing::info!(ai_id = %ai_id, "Identity created");
        Ok(Identity {
            ai_id: ai_id.clone(),
            seed: SecretBox::new(Box::new(signing_key.to_bytes())),
            verifying_key,
            created_at,
        })
    }

    /// Load an existing identity.
    pub fn load_identity(&self, ai_id: &AiId) -> Result<Identity> {
        ai_id.validate()?;
        let path = self.key_path(ai_id);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            EmpiricaError::verification_failed(format!("no identity for {}: {}", ai_id, e))
        })?;
        let file: KeyFile = serde_json::from_str(&raw)
            .map_err(|e| EmpiricaError::verification_failed(format!("corrupt key file: {}", e)))?;

        let secret: [u8; 32] = URL_SAFE_NO_PAD
            .decode(&file.secret_key)
            .map_err(|e| EmpiricaError::verification_failed(format!("corrupt secret key: {}", e)))?
            .try_into()
            .map_err(|_| EmpiricaError::verification_failed("secret key must be 32 bytes"))?;
        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();

        // Key file self-consistency
        if export_public_key(&verifying_key) != file.public_key {
            return Err(EmpiricaError::verification_failed(format!(
                "key file for {} has mismatched public key",
                ai_id
            )));
        }

        Ok(Identity {
            ai_id: ai_id.clone(),
            seed: SecretBox::new(Box::new(secret)),
            verifying_key,
            created_at: file.created_at,
        })
    }

    pub fn has_identity(&self, ai_id: &AiId) -> bool {
        self.key_path(ai_id).exists()
    }

    /// Agent ids with keys in this keystore.
    pub fn list(&self) -> Result<Vec<AiId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root).with_context("Failed to read keystore")? {
            let entry = entry.with_context("Failed to read keystore entry")?;
            let name = entry.file_name();
            if let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str())
                && Path::new(&name).extension().and_then(|e| e.to_str()) == Some("key")
            {
                ids.push(AiId::new(stem));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

/// Exclusive-create write with owner-only permissions.
fn write_key_file(path: &Path, contents: &[u8], overwrite: bool) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context_fn(|| format!("Failed to create key file {}", path.display()))?;
    file.write_all(contents)
        .with_context("Failed to write key file")?;
    file.sync_all().with_context("Failed to sync key file")?;
    Ok(())
}
