//! Core types for the secrets layer.
//!
//! [`SecretString`] keeps plaintext out of logs, debug output and serialized
//! payloads. [`SecretKey`] is the canonical (upper-case) name of a
//! configuration value, shared by every resolution tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::SecretsError;

/// Maximum accepted length of a secret key.
pub const MAX_KEY_LENGTH: usize = 255;

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// - Debug output shows `SecretString([REDACTED])`
/// - Display output shows `[REDACTED]`
/// - Serialization outputs `"[REDACTED]"`, never the value
/// - Memory is zeroed on drop
///
/// The value is only reachable through [`SecretString::expose_secret`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(SecretString(value))
    }
}

impl SecretString {
    /// Creates a new SecretString from a string value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying secret value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Returns the length of the secret without exposing the value.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Canonical name of a configuration value, e.g. `SMTP_PASSWORD`.
///
/// Keys are case-insensitive on input and stored upper-cased. Allowed
/// characters are ASCII alphanumerics, `_`, `-` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    /// Validate and canonicalise a key.
    pub fn parse(raw: &str) -> Result<Self, SecretsError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SecretsError::invalid_key(raw, "key cannot be empty"));
        }
        if trimmed.len() > MAX_KEY_LENGTH {
            return Err(SecretsError::invalid_key(
                raw,
                format!("key exceeds {} characters", MAX_KEY_LENGTH),
            ));
        }
        if let Some(c) =
            trimmed.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(SecretsError::invalid_key(raw, format!("invalid character '{}'", c)));
        }
        if trimmed.starts_with('.') {
            return Err(SecretsError::invalid_key(raw, "key cannot start with '.'"));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Injected-file names to probe, in order: lower-case first, then upper-case.
    pub fn file_names(&self) -> [String; 2] {
        [self.0.to_ascii_lowercase(), self.0.clone()]
    }

    /// Environment variable name, optionally prefixed.
    pub fn env_var(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}{}", prefix.to_ascii_uppercase(), self.0)
            }
            _ => self.0.clone(),
        }
    }

    /// Whether the key starts with any of the given upper-case prefixes.
    pub fn has_prefix(&self, prefixes: &[&str]) -> bool {
        prefixes.iter().any(|p| self.0.starts_with(p))
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SecretKey {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Grouping of stored secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretCategory {
    ExternalApi,
    AppConfig,
    FeatureFlag,
}

impl SecretCategory {
    pub const ALL: [SecretCategory; 3] =
        [SecretCategory::ExternalApi, SecretCategory::AppConfig, SecretCategory::FeatureFlag];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecretCategory::ExternalApi => "external-api",
            SecretCategory::AppConfig => "app-config",
            SecretCategory::FeatureFlag => "feature-flag",
        }
    }
}

impl fmt::Display for SecretCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "external-api" => Ok(SecretCategory::ExternalApi),
            "app-config" => Ok(SecretCategory::AppConfig),
            "feature-flag" => Ok(SecretCategory::FeatureFlag),
            other => Err(format!(
                "unknown category '{}' (expected external-api, app-config or feature-flag)",
                other
            )),
        }
    }
}

/// Where a resolved value came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretTier {
    InjectedFile,
    Environment,
    Database,
    Default,
}

impl SecretTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretTier::InjectedFile => "file",
            SecretTier::Environment => "env",
            SecretTier::Database => "database",
            SecretTier::Default => "default",
        }
    }
}

impl fmt::Display for SecretTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted secret. `encrypted_value` is always ciphertext.
#[derive(Debug, Clone)]
pub struct SecretEntry {
    pub key: SecretKey,
    pub category: SecretCategory,
    pub encrypted_value: String,
    pub key_version: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
}

impl SecretEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Active and not expired; anything else is treated as absent by resolution.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    /// Metadata view without the ciphertext.
    pub fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            key: self.key.clone(),
            category: self.category,
            description: self.description.clone(),
            is_active: self.is_active,
            version: self.version,
            key_version: self.key_version.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            created_by: self.created_by.clone(),
            updated_by: self.updated_by.clone(),
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
        }
    }
}

/// Listing view of a secret: everything except the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretMetadata {
    pub key: SecretKey,
    pub category: SecretCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    pub version: i64,
    pub key_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
}

/// A value produced by the resolver. Lives only in process memory.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub key: SecretKey,
    pub value: SecretString,
    pub source: SecretTier,
    pub resolved_at: DateTime<Utc>,
}

/// Plaintext input for creating or updating a stored secret.
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub key: SecretKey,
    pub category: SecretCategory,
    pub value: SecretString,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewSecret {
    pub fn new(key: SecretKey, category: SecretCategory, value: impl Into<SecretString>) -> Self {
        Self { key, category, value: value.into(), description: None, expires_at: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}
