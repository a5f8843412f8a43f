//! Secret encryption service using AES-256-GCM
//!
//! Values stored in the secret store are sealed with AES-256-GCM under a
//! single master key. Each ciphertext is self-contained: a fresh random
//! 96-bit nonce is prepended to the sealed bytes (which carry the 16-byte
//! authentication tag) and the whole buffer is base64-encoded.
//!
//! ```text
//! base64( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! ## Configuration
//!
//! The master key is read once at startup, from the orchestrator-injected
//! file `<secrets_dir>/secrets_master_key` if present, otherwise from the
//! `SECRETS_MASTER_KEY` environment variable. It must be the base64 encoding
//! of exactly 32 bytes. A missing or malformed key is fatal.

use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

use crate::errors::{Error, Result};
use crate::secrets::SecretString;

/// Environment variable holding the base64 master key.
pub const MASTER_KEY_ENV: &str = "SECRETS_MASTER_KEY";

/// Environment variable holding the master key version label.
pub const MASTER_KEY_VERSION_ENV: &str = "SECRETS_MASTER_KEY_VERSION";

/// File name of the master key inside the injected secrets directory.
pub const MASTER_KEY_FILE: &str = "secrets_master_key";

/// Size of AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// Size of the AES-256 key in bytes
const KEY_SIZE: usize = 32;

/// Errors raised by the encryption provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    /// Ciphertext is not valid base64.
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,

    /// Ciphertext is shorter than nonce plus tag.
    #[error("ciphertext truncated: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },

    /// Tag verification failed: wrong key, or the ciphertext was altered.
    #[error("authentication failed (wrong master key or tampered ciphertext)")]
    AuthenticationFailed,

    /// Decrypted bytes are not UTF-8.
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,

    /// The system RNG could not produce a nonce.
    #[error("failed to generate nonce")]
    Rng,

    /// Sealing failed.
    #[error("failed to seal value")]
    Seal,
}

/// Configuration for the secret encryption service
#[derive(Clone)]
pub struct SecretEncryptionConfig {
    /// Base64-encoded 32-byte master encryption key
    pub master_key_base64: Zeroizing<String>,
    /// Key version for rotation tracking
    pub key_version: String,
}

impl std::fmt::Debug for SecretEncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEncryptionConfig")
            .field("master_key_base64", &"[REDACTED]")
            .field("key_version", &self.key_version)
            .finish()
    }
}

impl SecretEncryptionConfig {
    /// Load the master key, preferring the injected file over the environment.
    pub fn load(secrets_dir: &Path) -> Result<Self> {
        let key_file = secrets_dir.join(MASTER_KEY_FILE);
        let master_key_base64 = match std::fs::read_to_string(&key_file) {
            Ok(contents) => {
                debug!(path = %key_file.display(), "Loaded master key from injected secret file");
                contents.trim().to_string()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::env::var(MASTER_KEY_ENV).map_err(|_| {
                    Error::config(format!(
                        "{} is not set and {} does not exist. \
                         Generate a key with: handover-secrets generate-key",
                        MASTER_KEY_ENV,
                        key_file.display()
                    ))
                })?
            }
            Err(e) => {
                return Err(Error::Io {
                    source: e,
                    context: format!("Failed to read master key file {}", key_file.display()),
                })
            }
        };

        let key_version =
            std::env::var(MASTER_KEY_VERSION_ENV).unwrap_or_else(|_| "default".to_string());

        Ok(Self { master_key_base64: Zeroizing::new(master_key_base64), key_version })
    }

    /// Build a configuration from an explicit base64 key.
    pub fn from_base64(master_key_base64: impl Into<String>, key_version: impl Into<String>) -> Self {
        Self {
            master_key_base64: Zeroizing::new(master_key_base64.into()),
            key_version: key_version.into(),
        }
    }

    /// Create a development/testing configuration with a fixed key
    /// WARNING: Only use this for development/testing, never in production!
    pub fn for_testing() -> Self {
        let test_key = [0x42u8; KEY_SIZE];
        Self::from_base64(base64::engine::general_purpose::STANDARD.encode(test_key), "test")
    }
}

/// Generate a fresh random master key, base64-encoded.
pub fn generate_master_key() -> Result<String> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    SystemRandom::new()
        .fill(key.as_mut())
        .map_err(|_| Error::internal("Failed to generate random master key"))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(key.as_ref()))
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Secret encryption service
#[derive(Clone)]
pub struct SecretEncryption {
    key_bytes: Arc<Zeroizing<[u8; KEY_SIZE]>>,
    key_version: String,
    rng: Arc<SystemRandom>,
}

impl SecretEncryption {
    /// Create a new encryption service from configuration
    pub fn new(config: &SecretEncryptionConfig) -> Result<Self> {
        let key_bytes = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(config.master_key_base64.as_bytes())
                .map_err(|e| Error::config(format!("Invalid base64 in {}: {}", MASTER_KEY_ENV, e)))?,
        );

        if key_bytes.len() != KEY_SIZE {
            return Err(Error::config(format!(
                "{} must be {} bytes (256 bits), got {} bytes",
                MASTER_KEY_ENV,
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        let mut key_array = Zeroizing::new([0u8; KEY_SIZE]);
        key_array.copy_from_slice(&key_bytes);

        debug!(key_version = %config.key_version, "Secret encryption service initialized");

        Ok(Self {
            key_bytes: Arc::new(key_array),
            key_version: config.key_version.clone(),
            rng: Arc::new(SystemRandom::new()),
        })
    }

    /// Get the current key version
    pub fn key_version(&self) -> &str {
        &self.key_version
    }

    /// Encrypt a plaintext string into a self-contained base64 ciphertext.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &str) -> std::result::Result<String, EncryptionError> {
        let sealed = self.seal(plaintext.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }

    /// Decrypt a ciphertext produced by [`SecretEncryption::encrypt`].
    #[instrument(skip(self, ciphertext), fields(ciphertext_len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &str) -> std::result::Result<SecretString, EncryptionError> {
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(ciphertext.as_bytes())
            .map_err(|_| EncryptionError::InvalidEncoding)?;
        let plaintext = self.open(&sealed)?;
        String::from_utf8(plaintext.to_vec())
            .map(SecretString::new)
            .map_err(|_| EncryptionError::InvalidUtf8)
    }

    /// Seal raw bytes, returning `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            EncryptionError::Rng
        })?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, self.key_bytes.as_ref().as_ref())
            .map_err(|_| EncryptionError::Seal)?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = plaintext.to_vec();
        in_out.reserve(TAG_SIZE);
        sealing_key.seal_in_place_append_tag(Aad::empty(), &mut in_out).map_err(|_| {
            error!("Encryption failed");
            EncryptionError::Seal
        })?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    /// Open bytes produced by [`SecretEncryption::seal`].
    pub fn open(&self, sealed: &[u8]) -> std::result::Result<Zeroizing<Vec<u8>>, EncryptionError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EncryptionError::Truncated {
                len: sealed.len(),
                min: NONCE_SIZE + TAG_SIZE,
            });
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);

        let unbound_key = UnboundKey::new(&AES_256_GCM, self.key_bytes.as_ref().as_ref())
            .map_err(|_| EncryptionError::AuthenticationFailed)?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        let plaintext_len = opening_key
            .open_in_place(Aad::empty(), buffer.as_mut_slice())
            .map_err(|_| {
                error!("Decryption failed - possible tampering or wrong key");
                EncryptionError::AuthenticationFailed
            })?
            .len();
        buffer.truncate(plaintext_len);
        Ok(buffer)
    }
}

impl std::fmt::Debug for SecretEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEncryption")
            .field("key_version", &self.key_version)
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}
