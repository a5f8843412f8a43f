//! Common test utilities for all integration tests.
//!
//! Each [`TestEnv`] owns a fresh in-memory database with migrations applied,
//! a temporary injected-secrets directory and a unique environment variable
//! prefix, so tests never observe each other's state.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use handover_secrets::admin::{AdminConsole, Principal, Role};
use handover_secrets::config::DatabaseConfig;
use handover_secrets::secrets::{Resolver, SecretKey};
use handover_secrets::services::{SecretEncryption, SecretEncryptionConfig};
use handover_secrets::storage::{create_pool, DbPool, SecretStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Counter for generating unique environment prefixes within a test run
static ENV_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const CRITICAL_KEYS: &[&str] = &["DATABASE_URL", "SECRETS_MASTER_KEY"];

pub fn key(raw: &str) -> SecretKey {
    SecretKey::parse(raw).expect("valid test key")
}

pub fn admin() -> Principal {
    Principal::new("admin@example.com", Role::SuperAdmin)
}

pub fn account_admin() -> Principal {
    Principal::new("lead@example.com", Role::AccountAdmin)
}

pub async fn memory_pool() -> DbPool {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        auto_migrate: true,
        ..Default::default()
    };
    create_pool(&config).await.expect("create in-memory test pool")
}

pub fn store_with(pool: DbPool, encryption: SecretEncryptionConfig) -> SecretStore {
    let encryption = SecretEncryption::new(&encryption).expect("valid test master key");
    SecretStore::new(pool, Arc::new(encryption), CRITICAL_KEYS.iter().map(|k| key(k)))
}

/// Isolated store, resolver and console.
pub struct TestEnv {
    pub dir: TempDir,
    pub env_prefix: String,
    pub pool: DbPool,
    pub store: SecretStore,
    pub resolver: Arc<Resolver>,
    pub console: AdminConsole,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_role(Role::SuperAdmin).await
    }

    pub async fn with_role(required_role: Role) -> Self {
        let dir = tempfile::tempdir().expect("create secrets dir");
        let env_prefix = format!(
            "HSTEST{}_{}_",
            std::process::id(),
            ENV_COUNTER.fetch_add(1, Ordering::SeqCst)
        );

        let pool = memory_pool().await;
        let store = store_with(pool.clone(), SecretEncryptionConfig::for_testing());
        let resolver = Arc::new(
            Resolver::builder()
                .secrets_dir(dir.path())
                .env_prefix(Some(env_prefix.clone()))
                .store(store.clone())
                .build(),
        );
        let console = AdminConsole::new(
            store.clone(),
            Arc::clone(&resolver),
            required_role,
            Duration::from_secs(2),
        )
        .expect("build admin console");

        Self { dir, env_prefix, pool, store, resolver, console }
    }

    /// Write an injected secret file.
    pub fn write_file(&self, name: &str, contents: &str) {
        std::fs::write(self.dir.path().join(name), contents).expect("write secret file");
    }

    /// Set the environment variable the resolver reads for `key`.
    pub fn set_env(&self, key: &str, value: &str) {
        std::env::set_var(format!("{}{}", self.env_prefix, key), value);
    }

    pub fn remove_env(&self, key: &str) {
        std::env::remove_var(format!("{}{}", self.env_prefix, key));
    }
}
