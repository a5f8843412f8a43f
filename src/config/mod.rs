//! # Configuration Management
//!
//! Environment-driven configuration for the secrets layer. A `.env` file in
//! the working directory is honoured for local development.

pub mod settings;

pub use settings::{AppConfig, DatabaseConfig, ObservabilityConfig, SecretsConfig};

use crate::errors::Result;

/// Load configuration from the environment (and `.env` if present), then validate it.
pub fn load() -> Result<AppConfig> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let config = AppConfig::from_env()?;
    config.validate()?;
    Ok(config)
}

/// Parse a boolean flag. Accepts `true`, `1`, `yes`, `enabled` and `on`
/// (case-insensitive); everything else is false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "enabled" | "on")
}
