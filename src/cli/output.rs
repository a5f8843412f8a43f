//! Output formatting for CLI commands
//!
//! Every command can print JSON or YAML; the listing commands also have a
//! plain table layout.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::admin::ConnectionTestReport;
use crate::secrets::{ResolvedConfig, SecretMetadata};
use crate::storage::AuditLogEntry;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
    Table,
}

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(data).context("Failed to serialize to YAML")?;
    println!("{}", yaml);
    Ok(())
}

/// Print structured data, falling back to `table` for the table format.
pub fn print_with<T, F>(data: &T, format: OutputFormat, table: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T),
{
    match format {
        OutputFormat::Json => print_json(&data),
        OutputFormat::Yaml => print_yaml(&data),
        OutputFormat::Table => {
            table(data);
            Ok(())
        }
    }
}

/// Truncate string to maximum length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_table_header(columns: &[(&str, usize)]) {
    let mut header = String::new();
    for (name, width) in columns {
        header.push_str(&format!("{:<width$} ", name, width = width));
    }
    println!("{}", header.trim_end());

    let total_width: usize = columns.iter().map(|(_, w)| w + 1).sum();
    println!("{}", "-".repeat(total_width.saturating_sub(1)));
}

pub fn print_metadata_table(secrets: &[SecretMetadata]) {
    if secrets.is_empty() {
        println!("No stored secrets");
        return;
    }

    print_table_header(&[
        ("Key", 36),
        ("Category", 14),
        ("Version", 8),
        ("Updated", 20),
        ("Expires", 20),
        ("Description", 30),
    ]);
    for secret in secrets {
        println!(
            "{:<36} {:<14} {:<8} {:<20} {:<20} {}",
            truncate(secret.key.as_str(), 36),
            secret.category,
            secret.version,
            secret.updated_at.format("%Y-%m-%d %H:%M:%S"),
            secret
                .expires_at
                .map(|e| e.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            truncate(secret.description.as_deref().unwrap_or(""), 30),
        );
    }
}

pub fn print_audit_table(entries: &[AuditLogEntry]) {
    if entries.is_empty() {
        println!("No audit entries");
        return;
    }

    print_table_header(&[
        ("Timestamp", 20),
        ("Key", 30),
        ("Action", 10),
        ("Outcome", 8),
        ("Actor", 24),
        ("Detail", 40),
    ]);
    for entry in entries {
        println!(
            "{:<20} {:<30} {:<10} {:<8} {:<24} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            truncate(&entry.secret_key, 30),
            entry.action,
            entry.outcome,
            truncate(&entry.actor_user_id, 24),
            truncate(entry.detail.as_deref().unwrap_or(""), 40),
        );
    }
}

pub fn print_resolution_table(resolved: &[ResolvedConfig]) {
    if resolved.is_empty() {
        println!("No required keys configured");
        return;
    }

    print_table_header(&[("Key", 36), ("Source", 10), ("Resolved At", 20)]);
    for config in resolved {
        println!(
            "{:<36} {:<10} {}",
            truncate(config.key.as_str(), 36),
            config.source,
            config.resolved_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

pub fn print_connection_report(report: &ConnectionTestReport) {
    let status = if report.success { "OK" } else { "FAILED" };
    println!("{} [{}] {}: {}", status, report.probe.as_str(), report.key, report.message);
    if let Some(latency) = report.latency_ms {
        println!("  latency: {} ms", latency);
    }
    if let Some(info) = report.value_info {
        println!("  length: {} (empty: {})", info.length, info.is_empty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_print_formats() {
        let data = TestData { name: "SMTP_PORT".to_string(), value: 587 };
        assert!(print_with(&data, OutputFormat::Json, |_| {}).is_ok());
        assert!(print_with(&data, OutputFormat::Yaml, |_| {}).is_ok());

        let mut called = false;
        print_with(&data, OutputFormat::Table, |_| called = true).unwrap();
        assert!(called);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hi", 5), "hi");
        assert_eq!(truncate("hello", 3), "...");
    }

    #[test]
    fn test_empty_tables() {
        print_metadata_table(&[]);
        print_audit_table(&[]);
        print_resolution_table(&[]);
    }
}
