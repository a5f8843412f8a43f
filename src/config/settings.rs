//! # Configuration Settings
//!
//! Defines the configuration structure for the secrets layer. Every section
//! is populated from environment variables and checked with `validator`
//! before the process does any work.

use crate::admin::Role;
use crate::errors::{Error, Result};
use crate::secrets::{SecretKey, DEFAULT_CRITICAL_KEYS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Secrets resolution and administration
    #[validate(nested)]
    pub secrets: SecretsConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load every section from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env(),
            secrets: SecretsConfig::from_env()?,
            observability: ObservabilityConfig::from_env(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(Error::validation_field(
                "Database URL must start with 'sqlite:'",
                "database.url",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(Error::validation_field(
                "min_connections cannot be greater than max_connections",
                "database.min_connections",
            ));
        }

        self.secrets.required_secret_keys()?;
        self.secrets.critical_secret_keys()?;

        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/handover.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Whether the URL points at an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }

    /// Create DatabaseConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            url: std::env::var("DATABASE_URL").unwrap_or(defaults.url),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            connect_timeout_seconds: env_parse("DATABASE_CONNECT_TIMEOUT_SECONDS")
                .unwrap_or(defaults.connect_timeout_seconds),
            idle_timeout_seconds: env_parse("DATABASE_IDLE_TIMEOUT_SECONDS")
                .unwrap_or(defaults.idle_timeout_seconds),
            auto_migrate: std::env::var("DATABASE_AUTO_MIGRATE")
                .map(|s| super::parse_bool(&s))
                .unwrap_or(defaults.auto_migrate),
        }
    }
}

/// Secrets resolution and administration configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecretsConfig {
    /// Directory holding orchestrator-injected secret files
    pub secrets_dir: PathBuf,

    /// Optional prefix for environment variable lookups
    pub env_prefix: Option<String>,

    /// Keys that must resolve at boot
    pub required_keys: Vec<String>,

    /// Keys that may never be stored in, or resolved from, the database
    pub critical_keys: Vec<String>,

    /// Minimum role for administrative operations
    pub admin_required_role: Role,

    /// Timeout for connection tests in seconds
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection test timeout must be between 1 and 300 seconds"
    ))]
    pub connection_test_timeout_seconds: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            secrets_dir: PathBuf::from("/run/secrets"),
            env_prefix: None,
            required_keys: Vec::new(),
            critical_keys: DEFAULT_CRITICAL_KEYS.iter().map(|k| k.to_string()).collect(),
            admin_required_role: Role::SuperAdmin,
            connection_test_timeout_seconds: 5,
        }
    }
}

impl SecretsConfig {
    pub fn connection_test_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_test_timeout_seconds)
    }

    /// Parsed `required_keys`.
    pub fn required_secret_keys(&self) -> Result<Vec<SecretKey>> {
        parse_keys(&self.required_keys)
    }

    /// Parsed `critical_keys`.
    pub fn critical_secret_keys(&self) -> Result<Vec<SecretKey>> {
        parse_keys(&self.critical_keys)
    }

    /// Create SecretsConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let admin_required_role = match std::env::var("ADMIN_REQUIRED_ROLE") {
            Ok(raw) => raw.parse::<Role>().map_err(|e| {
                Error::validation_field(format!("Invalid ADMIN_REQUIRED_ROLE: {}", e), "admin_required_role")
            })?,
            Err(_) => defaults.admin_required_role,
        };

        Ok(Self {
            secrets_dir: std::env::var("SECRETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.secrets_dir),
            env_prefix: std::env::var("SECRETS_ENV_PREFIX").ok().filter(|p| !p.is_empty()),
            required_keys: std::env::var("SECRETS_REQUIRED_KEYS")
                .map(|s| split_list(&s))
                .unwrap_or(defaults.required_keys),
            critical_keys: std::env::var("SECRETS_CRITICAL_KEYS")
                .map(|s| split_list(&s))
                .unwrap_or(defaults.critical_keys),
            admin_required_role,
            connection_test_timeout_seconds: env_parse("CONNECTION_TEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.connection_test_timeout_seconds),
        })
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "handover-secrets".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if !self.enable_metrics || self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            enable_metrics: std::env::var("ENABLE_METRICS")
                .map(|s| super::parse_bool(&s))
                .unwrap_or(defaults.enable_metrics),
            metrics_port: env_parse("METRICS_PORT").unwrap_or(defaults.metrics_port),
            service_name: std::env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging: std::env::var("LOG_FORMAT")
                .map(|s| s.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.json_logging),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn parse_keys(raw: &[String]) -> Result<Vec<SecretKey>> {
    raw.iter()
        .map(|k| SecretKey::parse(k).map_err(|e| Error::validation_field(e.to_string(), "secrets")))
        .collect()
}
