//! Administrative operations over stored secrets.
//!
//! Every entry point runs the same role check first. A denied call returns
//! [`SecretsError::Forbidden`] and leaves one `denied` audit entry naming the
//! attempted action. Writes go through the resolver's cache lock so that a
//! later `resolve` in this process observes them.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::authorization::{require_role, Principal, Role};
use super::connection::{ConnectionTestReport, ConnectionTester};
use crate::config::SecretsConfig;
use crate::observability::MetricsRecorder;
use crate::secrets::{
    NewSecret, Resolver, Result, SecretCategory, SecretKey, SecretMetadata, SecretString,
};
use crate::storage::{AuditAction, AuditLogEntry, AuditQuery, AuditRecord, SecretStore};

/// Audit key used for operations that span every secret.
pub const ALL_SECRETS: &str = "*";

/// A stored secret together with its decrypted value.
#[derive(Debug, Clone, Serialize)]
pub struct RevealedSecret {
    pub metadata: SecretMetadata,
    pub value: SecretString,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategorySummary {
    pub count: usize,
    pub keys: Vec<SecretKey>,
}

/// Backup-friendly listing of stored secrets. Never carries values.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataExport {
    pub exported_at: DateTime<Utc>,
    pub exported_by: String,
    pub secrets_count: usize,
    pub categories: BTreeMap<SecretCategory, CategorySummary>,
    pub secrets: Vec<SecretMetadata>,
}

/// Backend for the secrets admin surface.
#[derive(Clone)]
pub struct AdminConsole {
    store: SecretStore,
    resolver: Arc<Resolver>,
    tester: ConnectionTester,
    required_role: Role,
    metrics: MetricsRecorder,
}

impl AdminConsole {
    pub fn new(
        store: SecretStore,
        resolver: Arc<Resolver>,
        required_role: Role,
        connection_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            store,
            resolver,
            tester: ConnectionTester::new(connection_timeout)?,
            required_role,
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn from_config(
        store: SecretStore,
        resolver: Arc<Resolver>,
        config: &SecretsConfig,
    ) -> Result<Self> {
        Self::new(store, resolver, config.admin_required_role, config.connection_test_timeout())
    }

    pub fn required_role(&self) -> Role {
        self.required_role
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    async fn authorize(&self, principal: &Principal, action: AuditAction, key: &str) -> Result<()> {
        let Err(denied) = require_role(principal, self.required_role, action.as_str(), key) else {
            return Ok(());
        };

        warn!(
            actor = %principal.user_id,
            role = %principal.role,
            required = %self.required_role,
            action = %action,
            secret_key = %key,
            "Administrative operation denied"
        );
        self.metrics.record_admin_denied(action.as_str());
        self.store
            .record(AuditRecord::denied(key, &principal.actor(), action, denied.to_string()))
            .await?;
        Err(denied)
    }

    /// Metadata of active entries, optionally for one category.
    #[instrument(skip(self, principal), fields(actor = %principal.user_id))]
    pub async fn list_metadata(
        &self,
        principal: &Principal,
        category: Option<SecretCategory>,
    ) -> Result<Vec<SecretMetadata>> {
        self.authorize(principal, AuditAction::Read, ALL_SECRETS).await?;
        self.store.list(category).try_collect().await
    }

    /// Fetch and decrypt a stored entry, active or not.
    #[instrument(skip(self, principal), fields(actor = %principal.user_id, secret_key = %key))]
    pub async fn get_secret(&self, principal: &Principal, key: &SecretKey) -> Result<RevealedSecret> {
        self.authorize(principal, AuditAction::Read, key.as_str()).await?;

        let entry = self.store.get(key, &principal.actor()).await?;
        let value = self.store.decrypt(&entry)?;
        Ok(RevealedSecret { metadata: entry.metadata(), value })
    }

    /// Create or replace an entry.
    #[instrument(skip(self, principal, secret), fields(actor = %principal.user_id, secret_key = %secret.key))]
    pub async fn put(&self, principal: &Principal, secret: NewSecret) -> Result<SecretMetadata> {
        self.authorize(principal, AuditAction::Write, secret.key.as_str()).await?;

        let key = secret.key.clone();
        let actor = principal.actor();
        let entry = self.resolver.rotate_through(&key, self.store.put(secret, &actor)).await?;
        Ok(entry.metadata())
    }

    /// Replace the value of an active entry. A `resolve` issued after this
    /// returns sees the new value.
    #[instrument(skip(self, principal, value), fields(actor = %principal.user_id, secret_key = %key))]
    pub async fn rotate(
        &self,
        principal: &Principal,
        key: &SecretKey,
        value: SecretString,
    ) -> Result<SecretMetadata> {
        self.authorize(principal, AuditAction::Rotate, key.as_str()).await?;

        let actor = principal.actor();
        let entry = self.resolver.rotate_through(key, self.store.rotate(key, &value, &actor)).await?;
        info!(secret_key = %key, version = entry.version, actor = %actor.user_id, "Secret rotated by administrator");
        Ok(entry.metadata())
    }

    #[instrument(skip(self, principal), fields(actor = %principal.user_id, secret_key = %key))]
    pub async fn deactivate(&self, principal: &Principal, key: &SecretKey) -> Result<()> {
        self.authorize(principal, AuditAction::Deactivate, key.as_str()).await?;

        let actor = principal.actor();
        self.resolver.rotate_through(key, self.store.deactivate(key, &actor)).await
    }

    /// Re-enable a deactivated entry without re-entering its value.
    #[instrument(skip(self, principal), fields(actor = %principal.user_id, secret_key = %key))]
    pub async fn reactivate(&self, principal: &Principal, key: &SecretKey) -> Result<SecretMetadata> {
        self.authorize(principal, AuditAction::Reactivate, key.as_str()).await?;

        let actor = principal.actor();
        let entry = self.resolver.rotate_through(key, self.store.reactivate(key, &actor)).await?;
        Ok(entry.metadata())
    }

    /// Probe the service a key configures. The outcome is audited; a failed
    /// probe is still `Ok`.
    #[instrument(skip(self, principal), fields(actor = %principal.user_id, secret_key = %key))]
    pub async fn test_connection(
        &self,
        principal: &Principal,
        key: &SecretKey,
    ) -> Result<ConnectionTestReport> {
        self.authorize(principal, AuditAction::Test, key.as_str()).await?;

        let report = self.tester.test(&self.resolver, key).await;
        self.metrics.record_connection_test(report.success);

        let actor = principal.actor();
        let record = if report.success {
            AuditRecord::success(key.as_str(), &actor, AuditAction::Test)
                .with_detail(report.message.clone())
        } else {
            AuditRecord::failed(key.as_str(), &actor, AuditAction::Test, report.message.clone())
        };
        self.store.record(record).await?;

        info!(
            secret_key = %key,
            probe = report.probe.as_str(),
            success = report.success,
            actor = %actor.user_id,
            "Connection test completed"
        );
        Ok(report)
    }

    /// Counts and key names per category, plus per-entry metadata.
    #[instrument(skip(self, principal), fields(actor = %principal.user_id))]
    pub async fn export_metadata(&self, principal: &Principal) -> Result<MetadataExport> {
        self.authorize(principal, AuditAction::Export, ALL_SECRETS).await?;

        let actor = principal.actor();
        let secrets: Vec<SecretMetadata> = match self.store.list(None).try_collect().await {
            Ok(secrets) => secrets,
            Err(e) => {
                self.store
                    .record(AuditRecord::failed(ALL_SECRETS, &actor, AuditAction::Export, e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        let mut categories: BTreeMap<SecretCategory, CategorySummary> =
            SecretCategory::ALL.iter().map(|c| (*c, CategorySummary::default())).collect();
        for secret in &secrets {
            let summary = categories.entry(secret.category).or_default();
            summary.count += 1;
            summary.keys.push(secret.key.clone());
        }

        self.store
            .record(
                AuditRecord::success(ALL_SECRETS, &actor, AuditAction::Export)
                    .with_detail(format!("{} secrets", secrets.len())),
            )
            .await?;
        info!(secrets_count = secrets.len(), actor = %actor.user_id, "Secrets metadata exported");

        Ok(MetadataExport {
            exported_at: Utc::now(),
            exported_by: actor.user_id,
            secrets_count: secrets.len(),
            categories,
            secrets,
        })
    }

    /// Read the audit log, newest first.
    #[instrument(skip(self, principal), fields(actor = %principal.user_id))]
    pub async fn audit_log(
        &self,
        principal: &Principal,
        query: &AuditQuery,
    ) -> Result<Vec<AuditLogEntry>> {
        let scope = query.secret_key.as_ref().map_or(ALL_SECRETS, SecretKey::as_str);
        self.authorize(principal, AuditAction::Export, scope).await?;

        let entries = self.store.audit_log().query(query).await?;
        self.store
            .record(
                AuditRecord::success(scope, &principal.actor(), AuditAction::Export)
                    .with_detail(format!("audit log ({} entries)", entries.len())),
            )
            .await?;
        Ok(entries)
    }
}

impl std::fmt::Debug for AdminConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConsole")
            .field("required_role", &self.required_role)
            .field("connection_timeout", &self.tester.timeout())
            .finish()
    }
}
