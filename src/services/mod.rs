//! Cryptographic services.

pub mod secret_encryption;

pub use secret_encryption::{
    generate_master_key, EncryptionError, SecretEncryption, SecretEncryptionConfig,
};
