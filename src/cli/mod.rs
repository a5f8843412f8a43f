//! # Command Line Interface
//!
//! Operator front-end for the secrets layer. Every command except
//! `generate-key` runs the full boot sequence first, so `check` doubles as a
//! deployment smoke test.

pub mod output;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::Instrument;

use crate::admin::{Principal, Role};
use crate::errors::Error;
use crate::observability::{init_observability, log_config_info};
use crate::secrets::{
    FeatureFlags, NewSecret, SecretCategory, SecretKey, SecretString, SecretsError,
    ServiceNowSettings, SmtpSettings,
};
use crate::services::generate_master_key;
use crate::startup::{bootstrap, SecretsRuntime};
use crate::storage::{check_connection, get_pool_stats, list_applied_migrations, AuditQuery};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "handover-secrets")]
#[command(about = "Shift handover secrets administration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// User id recorded in the audit log
    #[arg(long, global = true, default_value = "cli")]
    pub user: String,

    /// Role the caller acts with
    #[arg(long, global = true, default_value = "super_admin")]
    pub role: Role,

    /// Source address recorded in the audit log
    #[arg(long, global = true)]
    pub source_ip: Option<IpAddr>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot, resolve every required key and show where each came from
    Check,

    /// List stored secrets (metadata only)
    List {
        /// Only this category (external-api, app-config, feature-flag)
        #[arg(long)]
        category: Option<SecretCategory>,
    },

    /// Show a stored secret, including its decrypted value
    Get { key: SecretKey },

    /// Create or replace a stored secret
    Put {
        key: SecretKey,

        #[arg(long)]
        category: SecretCategory,

        #[command(flatten)]
        value: ValueArgs,

        #[arg(long)]
        description: Option<String>,

        /// RFC 3339 timestamp after which the entry is ignored
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },

    /// Replace the value of an active stored secret
    Rotate {
        key: SecretKey,

        #[command(flatten)]
        value: ValueArgs,
    },

    /// Deactivate a stored secret
    Deactivate { key: SecretKey },

    /// Re-enable a deactivated secret with its stored value
    Reactivate { key: SecretKey },

    /// Test the connection configured by a key
    Test { key: SecretKey },

    /// Export secret metadata (never values)
    Export,

    /// Show the audit log, newest first
    Audit {
        /// Only entries for this key
        #[arg(long)]
        key: Option<SecretKey>,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Print a new random master key
    GenerateKey,
}

/// Where a new secret value comes from. With neither flag the value is read
/// from stdin.
#[derive(clap::Args, Debug, Clone)]
pub struct ValueArgs {
    /// Value on the command line
    #[arg(long, conflicts_with = "value_file")]
    pub value: Option<String>,

    /// File holding the value; trailing newlines are stripped
    #[arg(long)]
    pub value_file: Option<PathBuf>,
}

impl ValueArgs {
    async fn read(self) -> anyhow::Result<SecretString> {
        let raw = match (self.value, self.value_file) {
            (Some(value), _) => value,
            (None, Some(path)) => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read value from {}", path.display()))?,
            (None, None) => {
                let mut raw = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut raw)
                    .await
                    .context("Failed to read value from stdin")?;
                raw
            }
        };

        let value = raw.trim_end_matches(['\n', '\r']);
        if value.is_empty() {
            bail!("Secret value cannot be empty");
        }
        Ok(SecretString::new(value))
    }
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::GenerateKey = cli.command {
        println!("{}", generate_master_key()?);
        return Ok(());
    }

    let mut config = crate::config::load()?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    init_observability(&config.observability)?;
    log_config_info(&config);

    let runtime = bootstrap(config).await?;

    let mut principal = Principal::new(cli.user, cli.role);
    if let Some(ip) = cli.source_ip {
        principal = principal.with_source_ip(ip);
    }

    handle_command(cli.command, &runtime, &principal, cli.output).await
}

async fn handle_command(
    command: Commands,
    runtime: &SecretsRuntime,
    principal: &Principal,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let console = &runtime.console;

    match command {
        Commands::Check => {
            let required = runtime.config.secrets.required_secret_keys()?;
            let resolved = runtime.resolver.resolve_required(&required).await?;
            let smtp = SmtpSettings::load(&runtime.resolver).await?;
            let servicenow = ServiceNowSettings::load(&runtime.resolver).await?;
            let flags = FeatureFlags::load(&runtime.resolver).await?;
            check_connection(&runtime.pool).await?;
            let pool = get_pool_stats(&runtime.pool);
            let migrations = list_applied_migrations(&runtime.pool).await?;

            let report = json!({
                "required": resolved,
                "database": {
                    "pool": pool,
                    "migrations": migrations,
                },
                "smtp_configured": smtp.is_configured(),
                "servicenow_configured": servicenow.is_configured(),
                "feature_flags": {
                    "servicenow_integration": flags.servicenow_integration,
                    "ctask_assignment": flags.ctask_assignment,
                },
            });
            output::print_with(&report, format, |_| {
                output::print_resolution_table(&resolved);
                println!();
                println!("SMTP configured:      {}", smtp.is_configured());
                println!("ServiceNow configured: {}", servicenow.is_configured());
                println!(
                    "Database:             {} connections ({} active), {} migrations applied",
                    pool.size,
                    pool.active(),
                    migrations.len()
                );
                println!(
                    "Feature flags:        servicenow_integration={} ctask_assignment={}",
                    flags.servicenow_integration, flags.ctask_assignment
                );
            })?;
        }

        Commands::List { category } => {
            let secrets = console.list_metadata(principal, category).await?;
            output::print_with(&secrets, format, |s| output::print_metadata_table(s))?;
        }

        Commands::Get { key } => {
            let span = crate::secret_span!("get", key, actor = %principal.user_id);
            let revealed = console.get_secret(principal, &key).instrument(span).await?;
            let data = json!({
                "metadata": revealed.metadata,
                "value": revealed.value.expose_secret(),
            });
            output::print_with(&data, format, |_| println!("{}", revealed.value.expose_secret()))?;
        }

        Commands::Put { key, category, value, description, expires_at } => {
            let span = crate::secret_span!("put", key, actor = %principal.user_id);
            let mut secret = NewSecret::new(key, category, value.read().await?);
            if let Some(description) = description {
                secret = secret.with_description(description);
            }
            if let Some(expires_at) = expires_at {
                secret = secret.with_expiry(expires_at);
            }
            let metadata = console.put(principal, secret).instrument(span).await?;
            output::print_with(&metadata, format, |m| {
                println!("Stored {} (version {})", m.key, m.version)
            })?;
        }

        Commands::Rotate { key, value } => {
            let span = crate::secret_span!("rotate", key, actor = %principal.user_id);
            let value = value.read().await?;
            let metadata = console.rotate(principal, &key, value).instrument(span).await?;
            output::print_with(&metadata, format, |m| {
                println!("Rotated {} (version {})", m.key, m.version)
            })?;
        }

        Commands::Deactivate { key } => {
            let span = crate::secret_span!("deactivate", key, actor = %principal.user_id);
            console.deactivate(principal, &key).instrument(span).await?;
            output::print_with(&json!({ "key": key, "is_active": false }), format, |_| {
                println!("Deactivated {}", key)
            })?;
        }

        Commands::Reactivate { key } => {
            let span = crate::secret_span!("reactivate", key, actor = %principal.user_id);
            let metadata = console.reactivate(principal, &key).instrument(span).await?;
            output::print_with(&metadata, format, |m| {
                println!("Reactivated {} (version {})", m.key, m.version)
            })?;
        }

        Commands::Test { key } => {
            let span = crate::secret_span!("test", key, actor = %principal.user_id);
            let report = console.test_connection(principal, &key).instrument(span).await?;
            output::print_with(&report, format, output::print_connection_report)?;
            if !report.success {
                bail!("Connection test for {} failed", key);
            }
        }

        Commands::Export => {
            let export = console.export_metadata(principal).await?;
            // Exports are backups; they are always structured.
            let format = if format == OutputFormat::Table { OutputFormat::Json } else { format };
            output::print_with(&export, format, |_| {})?;
        }

        Commands::Audit { key, limit } => {
            let query = AuditQuery { secret_key: key, limit };
            let entries = console.audit_log(principal, &query).await?;
            output::print_with(&entries, format, |e| output::print_audit_table(e))?;
        }

        Commands::GenerateKey => println!("{}", generate_master_key()?),
    }

    Ok(())
}

/// Exit status for a failed command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<Error>() {
        e.exit_code()
    } else if let Some(e) = err.downcast_ref::<SecretsError>() {
        e.exit_code()
    } else {
        1
    }
}
