//! # Handover Secrets
//!
//! Hybrid secrets resolution for the shift handover application.
//!
//! Configuration values are looked up in orchestrator-injected secret files,
//! then environment variables, then encrypted database entries, then a
//! caller-supplied default. Database entries are managed through a role-gated
//! admin console that audits every call.
//!
//! ## Architecture
//!
//! ```text
//! Boot / CLI → Resolver ─┬─ FileSource (/run/secrets)
//!                        ├─ EnvSource
//!                        └─ DatabaseSource → SecretStore → SecretEncryption
//!                                                 ↓
//! AdminConsole ───────────────────────────→ audit_log
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use handover_secrets::{config, startup, Result};
//! use handover_secrets::secrets::SecretKey;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let runtime = startup::bootstrap(config::load()?).await?;
//!     let server = runtime
//!         .resolver
//!         .resolve(&SecretKey::parse("SMTP_SERVER")?, Some("localhost"))
//!         .await?;
//!     println!("SMTP server from {}", server.source);
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod storage;

pub use config::AppConfig;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
