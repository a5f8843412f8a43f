//! Error types for secrets resolution and administration.

use thiserror::Error;

use super::types::SecretTier;
use crate::services::EncryptionError;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while resolving, storing or administering secrets.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// No source supplied a value and no default was given.
    #[error("Required configuration '{key}' is missing: not found in injected secrets, environment, or database")]
    ConfigurationMissing { key: String },

    /// Ciphertext could not be opened under the current master key.
    #[error("Failed to decrypt secret '{key}': {source}")]
    Decryption {
        key: String,
        #[source]
        source: EncryptionError,
    },

    /// Caller lacks the role required for an administrative operation.
    #[error("Forbidden: '{actor}' needs role '{required}' to {action} '{key}'")]
    Forbidden { actor: String, action: String, key: String, required: String },

    /// The secret store could not be reached.
    #[error("Secret store unavailable during {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// Secret not present in the store.
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    /// Invalid secret key format, or a key that may not be stored.
    #[error("Invalid secret key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A resolved value could not be parsed into the expected type.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// An injected secret file exists but could not be read.
    #[error("Failed to read '{key}' from {tier}: {message}")]
    SourceUnreadable { key: String, tier: SecretTier, message: String },

    /// Store query failed for a reason other than unavailability.
    #[error("Database error during {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// Encryption failed while writing a value.
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SecretsError {
    /// Create a configuration missing error.
    pub fn configuration_missing(key: impl Into<String>) -> Self {
        Self::ConfigurationMissing { key: key.into() }
    }

    /// Create a decryption error for a key.
    pub fn decryption(key: impl Into<String>, source: EncryptionError) -> Self {
        Self::Decryption { key: key.into(), source }
    }

    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into(), reason: reason.into() }
    }

    /// Create an invalid value error.
    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue { key: key.into(), reason: reason.into() }
    }

    /// Create a store unavailable error.
    pub fn store_unavailable(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::StoreUnavailable { context: context.into(), source }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Classify a sqlx error: connectivity problems become
    /// [`SecretsError::StoreUnavailable`], everything else [`SecretsError::Database`].
    pub fn from_sqlx(context: impl Into<String>, source: sqlx::Error) -> Self {
        let context = context.into();
        match source {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::StoreUnavailable { context, source },
            other => Self::Database { context, source: other },
        }
    }

    /// Process exit status when this error ends a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigurationMissing { .. } | Self::Decryption { .. } => 78,
            Self::StoreUnavailable { .. } => 69,
            Self::Forbidden { .. } => 77,
            Self::NotFound { .. } | Self::InvalidKey { .. } | Self::InvalidValue { .. } => 65,
            _ => 1,
        }
    }

    /// Whether the error should abort resolution instead of falling through
    /// to a lower-priority tier.
    pub fn is_fatal_for_resolution(&self) -> bool {
        !matches!(self, Self::NotFound { .. } | Self::ConfigurationMissing { .. })
    }
}
