//! Tiered configuration resolver with an in-process cache.
//!
//! Lookup order is injected file, environment, database, then the caller's
//! default. The first hit is cached for the life of the process; defaults
//! are never cached.
//!
//! When built with a store, every uncached access appends a `read` audit
//! entry for the system actor naming the tier that answered. Database hits
//! are audited by the store itself.
//!
//! # Cache coherence
//!
//! The cache map sits behind a `tokio::sync::RwLock` together with a
//! generation counter. Every invalidation bumps the generation. A lookup
//! records the generation before consulting the tiers and only inserts its
//! result if the generation is unchanged, so a slow lookup that started
//! before a rotation cannot put the old value back.
//!
//! [`Resolver::rotate_through`] holds the write lock across the store write
//! and the invalidation: any `resolve` that runs after it returns sees the
//! new value.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::error::{Result, SecretsError};
use super::sources::{DatabaseSource, EnvSource, FileSource, SecretSource};
use super::types::{ResolvedConfig, SecretKey, SecretString, SecretTier};
use crate::observability::MetricsRecorder;
use crate::storage::{Actor, AuditAction, AuditLogRepository, AuditRecord, SecretStore};

#[derive(Default)]
struct CacheState {
    entries: HashMap<SecretKey, ResolvedConfig>,
    generation: u64,
}

impl CacheState {
    fn invalidate(&mut self, key: &SecretKey) {
        self.entries.remove(key);
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Resolves configuration keys across the ordered tiers.
///
/// Construct one per process and share it via `Arc`.
pub struct Resolver {
    sources: Vec<Box<dyn SecretSource>>,
    cache: RwLock<CacheState>,
    audit: Option<AuditLogRepository>,
    metrics: MetricsRecorder,
}

impl Resolver {
    /// Build a resolver from explicit tiers, consulted in the given order.
    pub fn new(sources: Vec<Box<dyn SecretSource>>) -> Self {
        Self {
            sources,
            cache: RwLock::new(CacheState::default()),
            audit: None,
            metrics: MetricsRecorder::new(),
        }
    }

    /// Record resolved accesses in `audit`.
    pub fn with_audit(mut self, audit: AuditLogRepository) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    /// Tiers in lookup order.
    pub fn tiers(&self) -> Vec<SecretTier> {
        self.sources.iter().map(|s| s.tier()).collect()
    }

    /// Resolve a key, falling back to `default` when no tier has it.
    ///
    /// Fails with [`SecretsError::ConfigurationMissing`] when nothing matches
    /// and no default was given.
    #[instrument(skip(self, default), fields(secret_key = %key, has_default = default.is_some()))]
    pub async fn resolve(&self, key: &SecretKey, default: Option<&str>) -> Result<ResolvedConfig> {
        if let Some(resolved) = self.resolve_entry(key).await? {
            return Ok(resolved);
        }

        match default {
            Some(default) => {
                debug!(secret_key = %key, "Using default value");
                self.audit_access(key, SecretTier::Default).await?;
                self.metrics.record_resolution(SecretTier::Default);
                Ok(ResolvedConfig {
                    key: key.clone(),
                    value: SecretString::new(default),
                    source: SecretTier::Default,
                    resolved_at: Utc::now(),
                })
            }
            None => Err(SecretsError::configuration_missing(key.as_str())),
        }
    }

    /// Resolve a key without a default. `Ok(None)` when no tier has it.
    pub async fn resolve_optional(&self, key: &SecretKey) -> Result<Option<SecretString>> {
        Ok(self.resolve_entry(key).await?.map(|r| r.value))
    }

    /// Resolve every key or fail on the first missing one, naming it.
    pub async fn resolve_required(&self, keys: &[SecretKey]) -> Result<Vec<ResolvedConfig>> {
        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            resolved.push(self.resolve(key, None).await?);
        }
        info!(count = resolved.len(), "All required configuration resolved");
        Ok(resolved)
    }

    /// Cached lookup across the tiers. Defaults are not involved.
    pub async fn resolve_entry(&self, key: &SecretKey) -> Result<Option<ResolvedConfig>> {
        let generation = {
            let cache = self.cache.read().await;
            if let Some(hit) = cache.entries.get(key) {
                return Ok(Some(hit.clone()));
            }
            cache.generation
        };

        let Some(resolved) = self.lookup(key).await? else {
            return Ok(None);
        };

        let mut cache = self.cache.write().await;
        if cache.generation == generation {
            cache.entries.insert(key.clone(), resolved.clone());
        } else {
            debug!(secret_key = %key, "Cache invalidated during lookup; not caching result");
        }
        Ok(Some(resolved))
    }

    async fn lookup(&self, key: &SecretKey) -> Result<Option<ResolvedConfig>> {
        for source in &self.sources {
            let tier = source.tier();
            match source.fetch(key).await {
                Ok(Some(value)) => {
                    if tier != SecretTier::Database {
                        self.audit_access(key, tier).await?;
                    }
                    info!(secret_key = %key, tier = %tier, "Loaded configuration");
                    self.metrics.record_resolution(tier);
                    return Ok(Some(ResolvedConfig {
                        key: key.clone(),
                        value,
                        source: tier,
                        resolved_at: Utc::now(),
                    }));
                }
                Ok(None) => continue,
                Err(e) if !e.is_fatal_for_resolution() => continue,
                Err(e) => {
                    tracing::error!(secret_key = %key, tier = %tier, error = %e, "Resolution aborted");
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    async fn audit_access(&self, key: &SecretKey, tier: SecretTier) -> Result<()> {
        let Some(audit) = &self.audit else {
            return Ok(());
        };

        let record = AuditRecord::success(key.as_str(), &Actor::system(), AuditAction::Read)
            .with_detail(format!("source={}", tier));
        audit.append(&record).await.map(|_| ()).map_err(|e| {
            tracing::error!(secret_key = %key, tier = %tier, error = %e, "Failed to audit configuration access");
            e
        })
    }

    /// Drop the cached value for one key.
    pub async fn invalidate(&self, key: &SecretKey) {
        self.cache.write().await.invalidate(key);
        debug!(secret_key = %key, "Invalidated cached configuration");
    }

    /// Drop every cached value.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.entries.clear();
        cache.generation = cache.generation.wrapping_add(1);
    }

    /// Run a store write for `key` while holding the cache write lock, then
    /// invalidate the key. The key is invalidated even if the write fails.
    pub async fn rotate_through<F, T>(&self, key: &SecretKey, write: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut cache = self.cache.write().await;
        let result = write.await;
        cache.invalidate(key);
        result
    }

    /// Number of cached keys.
    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.entries.len()
    }

    /// Tier a cached key came from, if cached.
    pub async fn cached_tier(&self, key: &SecretKey) -> Option<SecretTier> {
        self.cache.read().await.entries.get(key).map(|r| r.source)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").field("tiers", &self.tiers()).finish()
    }
}

/// Builder for the standard file → env → database chain.
#[derive(Default)]
pub struct ResolverBuilder {
    secrets_dir: Option<PathBuf>,
    env_prefix: Option<String>,
    store: Option<SecretStore>,
}

impl ResolverBuilder {
    pub fn secrets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.secrets_dir = Some(dir.into());
        self
    }

    pub fn env_prefix(mut self, prefix: Option<String>) -> Self {
        self.env_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn store(mut self, store: SecretStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Resolver {
        let mut sources: Vec<Box<dyn SecretSource>> = Vec::with_capacity(3);
        if let Some(dir) = self.secrets_dir {
            sources.push(Box::new(FileSource::new(dir)));
        }
        sources.push(Box::new(match self.env_prefix {
            Some(prefix) => EnvSource::with_prefix(prefix),
            None => EnvSource::new(),
        }));
        let audit = self.store.as_ref().map(|store| store.audit_log().clone());
        if let Some(store) = self.store {
            sources.push(Box::new(DatabaseSource::new(store)));
        }

        let resolver = Resolver::new(sources);
        match audit {
            Some(audit) => resolver.with_audit(audit),
            None => resolver,
        }
    }
}
