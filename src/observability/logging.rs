//! # Structured Logging
//!
//! Subscriber setup and span helpers. Logs go to stderr so command output on
//! stdout stays machine-readable. `RUST_LOG` takes precedence over the
//! configured level; `LOG_FORMAT=json` switches to JSON lines.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for an operation on a single secret.
///
/// ```rust,ignore
/// let span = secret_span!("rotate", "SMTP_PASSWORD");
/// let span = secret_span!("rotate", "SMTP_PASSWORD", actor = "alice");
/// ```
#[macro_export]
macro_rules! secret_span {
    ($operation:expr, $key:expr) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            secret_key = %$key,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $key:expr, $($field:tt)*) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            secret_key = %$key,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config(format!("Invalid log level '{}': {}", config.log_level, e)))?;

    let builder = fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);

    let result = if config.json_logging {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| Error::internal(format!("Failed to install log subscriber: {}", e)))
}

/// Log configuration at startup. Never logs values, only where they come from.
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        database_url = %config.database.url,
        secrets_dir = %config.secrets.secrets_dir.display(),
        env_prefix = ?config.secrets.env_prefix,
        required_keys = config.secrets.required_keys.len(),
        admin_required_role = %config.secrets.admin_required_role,
        metrics_enabled = %config.observability.enable_metrics,
        "Secrets layer configuration"
    );
}
