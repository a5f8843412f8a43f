//! Boot sequence for the secrets layer.
//!
//! 1. Resolve `DATABASE_URL` from injected files and the environment only
//! 2. Open the pool (running migrations when configured)
//! 3. Load the master key and open the secret store
//! 4. Build the full resolver and resolve every required key
//!
//! Any failure aborts boot. [`crate::Error::exit_code`] maps it to a process
//! exit status.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::admin::AdminConsole;
use crate::config::AppConfig;
use crate::errors::Result;
use crate::secrets::{Resolver, SecretKey, SecretTier};
use crate::services::{SecretEncryption, SecretEncryptionConfig};
use crate::storage::{create_pool, DbPool, SecretStore};

const DATABASE_URL_KEY: &str = "DATABASE_URL";

/// Everything a running process needs from the secrets layer.
#[derive(Debug, Clone)]
pub struct SecretsRuntime {
    pub config: AppConfig,
    pub pool: DbPool,
    pub store: SecretStore,
    pub resolver: Arc<Resolver>,
    pub console: AdminConsole,
}

/// Resolver over injected files and the environment, without the database tier.
pub fn bootstrap_resolver(config: &AppConfig) -> Resolver {
    Resolver::builder()
        .secrets_dir(&config.secrets.secrets_dir)
        .env_prefix(config.secrets.env_prefix.clone())
        .build()
}

/// Run the boot sequence.
#[instrument(skip(config), name = "secrets_boot")]
pub async fn bootstrap(mut config: AppConfig) -> Result<SecretsRuntime> {
    let database_url_key = SecretKey::parse(DATABASE_URL_KEY)?;
    let bootstrap = bootstrap_resolver(&config);
    let database_url =
        bootstrap.resolve(&database_url_key, Some(config.database.url.as_str())).await?;
    if database_url.source != SecretTier::Default {
        config.database.url = database_url.value.expose_secret().to_string();
    }
    info!(source = %database_url.source, "Resolved database location");

    let pool = create_pool(&config.database).await?;

    let encryption = SecretEncryption::new(&SecretEncryptionConfig::load(&config.secrets.secrets_dir)?)?;
    info!(key_version = encryption.key_version(), "Loaded secrets master key");

    let store =
        SecretStore::new(pool.clone(), Arc::new(encryption), config.secrets.critical_secret_keys()?);

    let resolver = Arc::new(
        Resolver::builder()
            .secrets_dir(&config.secrets.secrets_dir)
            .env_prefix(config.secrets.env_prefix.clone())
            .store(store.clone())
            .build(),
    );

    let required = config.secrets.required_secret_keys()?;
    resolver.resolve_required(&required).await?;

    let console = AdminConsole::from_config(store.clone(), Arc::clone(&resolver), &config.secrets)?;

    info!(required_keys = required.len(), tiers = ?resolver.tiers(), "Secrets layer ready");
    Ok(SecretsRuntime { config, pool, store, resolver, console })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretsError;
    use crate::services::generate_master_key;
    use crate::Error;

    fn config_for(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.secrets.secrets_dir = dir.to_path_buf();
        config.secrets.env_prefix = Some("STARTUP_TEST_NONE_".to_string());
        config
    }

    #[tokio::test]
    async fn test_bootstrap_with_injected_master_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secrets_master_key"), generate_master_key().unwrap()).unwrap();
        std::fs::write(dir.path().join("smtp_server"), "mail.example.com\n").unwrap();

        let mut config = config_for(dir.path());
        config.secrets.required_keys = vec!["SMTP_SERVER".to_string()];

        let runtime = bootstrap(config).await.unwrap();
        assert_eq!(
            runtime.resolver.cached_tier(&SecretKey::parse("SMTP_SERVER").unwrap()).await,
            Some(SecretTier::InjectedFile)
        );
    }

    #[tokio::test]
    async fn test_bootstrap_names_missing_required_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secrets_master_key"), generate_master_key().unwrap()).unwrap();

        let mut config = config_for(dir.path());
        config.secrets.required_keys = vec!["SERVICENOW_INSTANCE_URL".to_string()];

        let err = bootstrap(config).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Secrets(SecretsError::ConfigurationMissing { ref key }) if key == "SERVICENOW_INSTANCE_URL"
        ));
        assert_eq!(err.exit_code(), 78);
    }

    #[tokio::test]
    async fn test_bootstrap_without_master_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = bootstrap(config_for(dir.path())).await.unwrap_err();
        assert_eq!(err.exit_code(), 78);
    }
}
