//! Encrypted database tier.

use async_trait::async_trait;

use super::SecretSource;
use crate::secrets::error::Result;
use crate::secrets::types::{SecretKey, SecretString, SecretTier};
use crate::storage::{Actor, SecretStore};

/// Reads and decrypts entries from the [`SecretStore`].
///
/// Inactive or expired entries are absent and do not count as an access.
/// Critical keys are never looked up here. Decryption and connectivity
/// failures are returned as errors so that resolution stops instead of
/// falling through to a default.
#[derive(Debug, Clone)]
pub struct DatabaseSource {
    store: SecretStore,
    actor: Actor,
}

impl DatabaseSource {
    pub fn new(store: SecretStore) -> Self {
        Self { store, actor: Actor::system() }
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }
}

#[async_trait]
impl SecretSource for DatabaseSource {
    fn tier(&self) -> SecretTier {
        SecretTier::Database
    }

    async fn fetch(&self, key: &SecretKey) -> Result<Option<SecretString>> {
        if self.store.is_critical(key) {
            tracing::debug!(secret_key = %key, "Skipping database tier for critical key");
            return Ok(None);
        }

        let Some(entry) = self.store.get_usable(key, &self.actor).await? else {
            return Ok(None);
        };
        self.store.decrypt(&entry).map(Some)
    }
}
