//! Signing and verification key material.
//!
//! Clients hold a [`SigningKey`] issued at login; the verifier resolves each
//! principal's [`VerificationKey`] through a [`KeyResolver`], normally a
//! [`KeyRing`] loaded from a keys file.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{AuthErrorKind, ServiceError};

/// Minimum accepted length of a shared HMAC secret.
pub const MIN_HMAC_SECRET_LEN: usize = 16;

const ED25519_SEED_LEN: usize = 32;
const ED25519_PUBLIC_KEY_LEN: usize = 32;

fn key_error(message: impl Into<String>) -> ServiceError {
    ServiceError::auth(AuthErrorKind::KeyMaterial {
        message: message.into(),
    })
}

fn hmac_key(secret: &[u8]) -> Result<hmac::Key, ServiceError> {
    if secret.len() < MIN_HMAC_SECRET_LEN {
        return Err(key_error(format!(
            "HMAC secret is {} bytes, expected at least {}",
            secret.len(),
            MIN_HMAC_SECRET_LEN
        )));
    }
    Ok(hmac::Key::new(hmac::HMAC_SHA256, secret))
}

/// Key material a client signs with.
pub enum SigningKey {
    /// Shared secret established at login, HMAC-SHA256.
    Hmac(hmac::Key),
    /// Private Ed25519 key; the server holds the public half.
    Ed25519(Ed25519KeyPair),
}

impl SigningKey {
    /// Build an HMAC-SHA256 key from a shared secret.
    pub fn hmac(secret: &[u8]) -> Result<Self, ServiceError> {
        hmac_key(secret).map(SigningKey::Hmac)
    }

    /// Build an Ed25519 key from a 32-byte seed.
    pub fn ed25519_from_seed(seed: &[u8]) -> Result<Self, ServiceError> {
        let pair = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| key_error(format!("Invalid Ed25519 seed: {}", e)))?;
        Ok(SigningKey::Ed25519(pair))
    }

    /// Generate a fresh Ed25519 key. Returns the seed alongside the key so the
    /// caller can persist it.
    pub fn generate_ed25519(
        rng: &SystemRandom,
    ) -> Result<(Self, [u8; ED25519_SEED_LEN]), ServiceError> {
        let mut seed = [0u8; ED25519_SEED_LEN];
        rng.fill(&mut seed)
            .map_err(|_| ServiceError::auth(AuthErrorKind::RandomSource))?;
        let key = Self::ed25519_from_seed(&seed)?;
        Ok((key, seed))
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            SigningKey::Hmac(key) => hmac::sign(key, message).as_ref().to_vec(),
            SigningKey::Ed25519(pair) => pair.sign(message).as_ref().to_vec(),
        }
    }

    /// The key the verifier needs to check this key's signatures.
    pub fn verification_key(&self) -> VerificationKey {
        match self {
            SigningKey::Hmac(key) => VerificationKey::Hmac(key.clone()),
            SigningKey::Ed25519(pair) => {
                VerificationKey::Ed25519(pair.public_key().as_ref().to_vec())
            }
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKey::Hmac(_) => f.write_str("SigningKey::Hmac(..)"),
            SigningKey::Ed25519(_) => f.write_str("SigningKey::Ed25519(..)"),
        }
    }
}

/// Key material the verifier checks signatures with.
#[derive(Clone)]
pub enum VerificationKey {
    Hmac(hmac::Key),
    Ed25519(Vec<u8>),
}

impl VerificationKey {
    pub fn ed25519(public_key: &[u8]) -> Result<Self, ServiceError> {
        if public_key.len() != ED25519_PUBLIC_KEY_LEN {
            return Err(key_error(format!(
                "Ed25519 public key is {} bytes, expected {}",
                public_key.len(),
                ED25519_PUBLIC_KEY_LEN
            )));
        }
        Ok(VerificationKey::Ed25519(public_key.to_vec()))
    }

    /// Check `signature` over `message`. Comparison is constant-time.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            VerificationKey::Hmac(key) => hmac::verify(key, message, signature).is_ok(),
            VerificationKey::Ed25519(public_key) => {
                UnparsedPublicKey::new(&signature::ED25519, public_key)
                    .verify(message, signature)
                    .is_ok()
            }
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            VerificationKey::Hmac(_) => "hmac-sha256",
            VerificationKey::Ed25519(_) => "ed25519",
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationKey::Hmac(_) => f.write_str("VerificationKey::Hmac(..)"),
            VerificationKey::Ed25519(pk) => {
                write!(f, "VerificationKey::Ed25519({})", hex::encode(pk))
            }
        }
    }
}

/// Looks up the verification key bound to a principal.
pub trait KeyResolver: Send + Sync {
    fn verification_key(&self, principal: &str) -> Option<Arc<VerificationKey>>;
}

#[derive(Debug, Deserialize)]
struct KeysFile {
    #[serde(default)]
    principals: Vec<PrincipalEntry>,
}

#[derive(Debug, Deserialize)]
struct PrincipalEntry {
    id: String,
    #[serde(flatten)]
    key: KeySpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "algorithm", rename_all = "kebab-case")]
enum KeySpec {
    /// Hex-encoded shared secret.
    HmacSha256 { secret: String },
    /// Hex-encoded 32-byte public key.
    Ed25519 { public_key: String },
}

impl KeySpec {
    fn into_key(self, principal: &str) -> Result<VerificationKey, ServiceError> {
        match self {
            KeySpec::HmacSha256 { secret } => {
                let bytes = hex::decode(secret.trim()).map_err(|e| {
                    key_error(format!("Principal '{}': secret is not hex: {}", principal, e))
                })?;
                hmac_key(&bytes).map(VerificationKey::Hmac)
            }
            KeySpec::Ed25519 { public_key } => {
                let bytes = hex::decode(public_key.trim()).map_err(|e| {
                    key_error(format!("Principal '{}': public_key is not hex: {}", principal, e))
                })?;
                VerificationKey::ed25519(&bytes)
            }
        }
    }
}

/// In-memory principal -> verification key table.
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: RwLock<HashMap<String, Arc<VerificationKey>>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, principal: impl Into<String>, key: VerificationKey) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(principal.into(), Arc::new(key));
    }

    pub fn remove(&self, principal: &str) -> bool {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.remove(principal).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse a keys file body.
    ///
    /// ```toml
    /// [[principals]]
    /// id = "u1"
    /// algorithm = "hmac-sha256"
    /// secret = "<hex>"
    ///
    /// [[principals]]
    /// id = "svc"
    /// algorithm = "ed25519"
    /// public_key = "<hex>"
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, ServiceError> {
        let ring = Self::new();
        ring.replace_all(parse_keys(content)?);
        Ok(ring)
    }

    /// Load a keys file.
    ///
    /// Security: Verifies the file has restrictive permissions (0600 or 0400)
    /// before loading to prevent secrets from being readable by other users.
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let ring = Self::new();
        ring.reload(path)?;
        Ok(ring)
    }

    /// Replace every key with the contents of `path`.
    ///
    /// On error the current keys are left untouched.
    pub fn reload(&self, path: &Path) -> Result<usize, ServiceError> {
        let content = read_restricted(path)?;
        let keys = parse_keys(&content)?;
        let count = keys.len();
        self.replace_all(keys);
        info!(path = %path.display(), principals = count, "Key ring loaded");
        Ok(count)
    }

    fn replace_all(&self, new_keys: HashMap<String, Arc<VerificationKey>>) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        *keys = new_keys;
    }
}

impl KeyResolver for KeyRing {
    fn verification_key(&self, principal: &str) -> Option<Arc<VerificationKey>> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(principal)
            .cloned()
    }
}

fn parse_keys(content: &str) -> Result<HashMap<String, Arc<VerificationKey>>, ServiceError> {
    let file: KeysFile = toml::from_str(content)
        .map_err(|e| key_error(format!("Failed to parse keys file: {}", e)))?;

    let mut keys = HashMap::with_capacity(file.principals.len());
    for entry in file.principals {
        if entry.id.is_empty() {
            return Err(key_error("Principal id must not be empty"));
        }
        let key = entry.key.into_key(&entry.id)?;
        debug!(principal = %entry.id, algorithm = key.algorithm(), "Loaded principal key");
        if keys.insert(entry.id.clone(), Arc::new(key)).is_some() {
            return Err(key_error(format!("Duplicate principal '{}'", entry.id)));
        }
    }
    Ok(keys)
}

fn read_restricted(path: &Path) -> Result<String, ServiceError> {
    // Check file permissions first
    let metadata = std::fs::metadata(path).map_err(|e| {
        key_error(format!(
            "Failed to read keys file metadata from {}: {}",
            path.display(),
            e
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        // Check that group and world bits are all zero (only owner can access)
        if mode & 0o077 != 0 {
            return Err(key_error(format!(
                "Keys file {} has insecure permissions {:04o}, expected 0600 or 0400",
                path.display(),
                mode & 0o777
            )));
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    std::fs::read_to_string(path).map_err(|e| {
        key_error(format!("Failed to read keys file {}: {}", path.display(), e))
    })
}
