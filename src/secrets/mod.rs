//! Hybrid secrets resolution.
//!
//! Configuration values come from, in priority order:
//!
//! 1. Orchestrator-injected files (`<secrets_dir>/<key>`)
//! 2. Process environment variables
//! 3. Encrypted entries in the database, managed through the admin console
//! 4. A default supplied by the caller
//!
//! The [`Resolver`] walks these tiers and caches the first hit. Values are
//! carried as [`SecretString`], which never prints or serializes its
//! contents.
//!
//! ```rust,ignore
//! use handover_secrets::secrets::{Resolver, SecretKey};
//!
//! let resolver = Resolver::builder()
//!     .secrets_dir("/run/secrets")
//!     .store(store)
//!     .build();
//!
//! let smtp_server = resolver.resolve(&SecretKey::parse("SMTP_SERVER")?, Some("localhost")).await?;
//! ```

pub mod error;
pub mod resolver;
pub mod settings;
pub mod sources;
pub mod types;

pub use error::{Result, SecretsError};
pub use resolver::{Resolver, ResolverBuilder};
pub use settings::{FeatureFlags, ServiceNowSettings, SmtpSettings};
pub use sources::{DatabaseSource, EnvSource, FileSource, SecretSource};
pub use types::{
    NewSecret, ResolvedConfig, SecretCategory, SecretEntry, SecretKey, SecretMetadata,
    SecretString, SecretTier,
};

/// Keys that may only come from injected files or the environment.
pub const DEFAULT_CRITICAL_KEYS: &[&str] = &[
    "DATABASE_URL",
    "DATABASE_PASSWORD",
    "MYSQL_PASSWORD",
    "MYSQL_ROOT_PASSWORD",
    "SECRET_KEY",
    "SECRETS_MASTER_KEY",
    "SSO_ENCRYPTION_KEY",
];
