//! # Metrics Collection
//!
//! Counters for secret resolution and administration, exported through
//! Prometheus when enabled. Without an installed recorder the `metrics`
//! macros are no-ops, so call sites never need to check.

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};
use crate::secrets::SecretTier;
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder for the secrets layer
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record which tier satisfied a resolution
    pub fn record_resolution(&self, tier: SecretTier) {
        counter!("secrets_resolutions_total", "tier" => tier.as_str()).increment(1);
    }

    /// Record a ciphertext that failed to open
    pub fn record_decryption_failure(&self) {
        counter!("secrets_decryption_failures_total").increment(1);
    }

    /// Record an administrative call rejected by the role check
    pub fn record_admin_denied(&self, action: &str) {
        let labels = [("action", action.to_string())];
        counter!("secrets_admin_denied_total", &labels).increment(1);
    }

    /// Record a connection test outcome
    pub fn record_connection_test(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        counter!("secrets_connection_tests_total", "outcome" => outcome).increment(1);
    }

    /// Register baseline metrics so Prometheus exports appear before events occur.
    pub fn register_secrets_metrics(&self) {
        describe_counter!(
            "secrets_resolutions_total",
            Unit::Count,
            "Configuration lookups grouped by the tier that supplied the value"
        );
        describe_counter!(
            "secrets_decryption_failures_total",
            Unit::Count,
            "Stored secrets that could not be decrypted with the current master key"
        );
        describe_counter!(
            "secrets_admin_denied_total",
            Unit::Count,
            "Administrative operations rejected by the role check"
        );
        describe_counter!(
            "secrets_connection_tests_total",
            Unit::Count,
            "Connection tests grouped by outcome"
        );

        for tier in
            [SecretTier::InjectedFile, SecretTier::Environment, SecretTier::Database, SecretTier::Default]
        {
            counter!("secrets_resolutions_total", "tier" => tier.as_str()).absolute(0);
        }
        counter!("secrets_decryption_failures_total").absolute(0);
        counter!("secrets_connection_tests_total", "outcome" => "success").absolute(0);
        counter!("secrets_connection_tests_total", "outcome" => "failure").absolute(0);
    }
}

/// Initialize metrics collection and Prometheus exporter
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    MetricsRecorder::new().register_secrets_metrics();

    info!(metrics_addr = %metrics_addr, service_name = %config.service_name, "Metrics collection initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let recorder = MetricsRecorder::new();
        recorder.register_secrets_metrics();
        recorder.record_resolution(SecretTier::Environment);
        recorder.record_decryption_failure();
        recorder.record_admin_denied("rotate");
        recorder.record_connection_test(false);
    }

    #[test]
    fn test_disabled_metrics_skip_exporter() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).is_ok());
    }
}
