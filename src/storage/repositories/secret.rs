//! Secret store for encrypted configuration entries.
//!
//! Values are encrypted before they reach SQL and decrypted only on request.
//! Every `get`, `put`, `rotate`, `deactivate` and `reactivate` appends exactly
//! one entry to the audit log, whether or not the operation succeeds. A
//! successful change and its audit entry commit in the same transaction, so
//! a change that cannot be audited is rolled back and reported as an error.

use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use sqlx::{FromRow, Sqlite, SqliteConnection, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::observability::MetricsRecorder;
use crate::secrets::{
    NewSecret, Result, SecretCategory, SecretEntry, SecretKey, SecretMetadata, SecretString,
    SecretsError,
};
use crate::services::SecretEncryption;
use crate::storage::repositories::audit_log::{
    Actor, AuditAction, AuditLogRepository, AuditRecord,
};
use crate::storage::DbPool;

const ENTRY_COLUMNS: &str = "secret_key, category, encrypted_value, key_version, description, \
     is_active, version, created_at, updated_at, expires_at, created_by, updated_by, \
     last_accessed_at, access_count";

/// Database row structure for secret entries
#[derive(Debug, Clone, FromRow)]
struct SecretEntryRow {
    secret_key: String,
    category: String,
    encrypted_value: String,
    key_version: String,
    description: Option<String>,
    is_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    created_by: Option<String>,
    updated_by: Option<String>,
    last_accessed_at: Option<DateTime<Utc>>,
    access_count: i64,
}

impl TryFrom<SecretEntryRow> for SecretEntry {
    type Error = SecretsError;

    fn try_from(row: SecretEntryRow) -> Result<Self> {
        let key = SecretKey::parse(&row.secret_key)?;
        let category = row.category.parse::<SecretCategory>().map_err(SecretsError::internal)?;

        Ok(SecretEntry {
            key,
            category,
            encrypted_value: row.encrypted_value,
            key_version: row.key_version,
            description: row.description,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            created_by: row.created_by,
            updated_by: row.updated_by,
            last_accessed_at: row.last_accessed_at,
            access_count: row.access_count,
        })
    }
}

/// Persistent, encrypted, audited secret storage.
#[derive(Clone)]
pub struct SecretStore {
    pool: DbPool,
    encryption: Arc<SecretEncryption>,
    audit: AuditLogRepository,
    critical_keys: Arc<HashSet<SecretKey>>,
    metrics: MetricsRecorder,
}

impl SecretStore {
    pub fn new(
        pool: DbPool,
        encryption: Arc<SecretEncryption>,
        critical_keys: impl IntoIterator<Item = SecretKey>,
    ) -> Self {
        Self {
            audit: AuditLogRepository::new(pool.clone()),
            pool,
            encryption,
            critical_keys: Arc::new(critical_keys.into_iter().collect()),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn audit_log(&self) -> &AuditLogRepository {
        &self.audit
    }

    /// Critical keys may only come from injected files or the environment.
    pub fn is_critical(&self, key: &SecretKey) -> bool {
        self.critical_keys.contains(key)
    }

    /// Append a standalone audit entry.
    pub(crate) async fn record(&self, record: AuditRecord) -> Result<()> {
        self.audit.append(&record).await.map(|_| ()).map_err(|e| {
            tracing::error!(
                error = %e,
                secret_key = %record.secret_key,
                action = %record.action,
                outcome = %record.outcome,
                "Failed to record secrets audit event"
            );
            e
        })
    }

    /// Audit a failed attempt and return its error. When the audit entry
    /// cannot be written, the audit error is returned instead.
    async fn fail<T>(
        &self,
        key: &SecretKey,
        actor: &Actor,
        action: AuditAction,
        err: SecretsError,
    ) -> Result<T> {
        if let Err(audit_err) =
            self.record(AuditRecord::failed(key.as_str(), actor, action, err.to_string())).await
        {
            tracing::error!(secret_key = %key, action = %action, error = %err, "Unaudited secrets operation failure");
            return Err(audit_err);
        }
        Err(err)
    }

    async fn begin(&self, key: &SecretKey) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| SecretsError::from_sqlx(format!("transaction for '{}'", key), e))
    }

    async fn commit(tx: Transaction<'static, Sqlite>, key: &SecretKey) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| SecretsError::from_sqlx(format!("commit for '{}'", key), e))
    }

    /// Fetch an entry (active or not), bumping its access counters.
    #[instrument(skip(self, actor), fields(secret_key = %key, actor = %actor.user_id), name = "db_get_secret")]
    pub async fn get(&self, key: &SecretKey, actor: &Actor) -> Result<SecretEntry> {
        match self.fetch_and_touch(key, actor).await {
            Ok(entry) => Ok(entry),
            Err(e) => self.fail(key, actor, AuditAction::Read, e).await,
        }
    }

    async fn fetch_and_touch(&self, key: &SecretKey, actor: &Actor) -> Result<SecretEntry> {
        let mut tx = self.begin(key).await?;
        let entry = match touch(&mut tx, key).await? {
            Some(row) => SecretEntry::try_from(row)?,
            None => return Err(SecretsError::not_found(key.as_str())),
        };
        AuditLogRepository::append_with(
            &mut *tx,
            &AuditRecord::success(key.as_str(), actor, AuditAction::Read),
        )
        .await?;
        Self::commit(tx, key).await?;
        Ok(entry)
    }

    /// Fetch an entry for resolution. Missing, inactive and expired entries
    /// are `Ok(None)`; they are audited as failed reads and their access
    /// counters are left alone.
    #[instrument(skip(self, actor), fields(secret_key = %key, actor = %actor.user_id), name = "db_resolve_secret")]
    pub async fn get_usable(&self, key: &SecretKey, actor: &Actor) -> Result<Option<SecretEntry>> {
        match self.fetch_usable(key, actor).await {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                self.record(AuditRecord::failed(
                    key.as_str(),
                    actor,
                    AuditAction::Read,
                    "entry is inactive or expired",
                ))
                .await?;
                Ok(None)
            }
            Err(e @ SecretsError::NotFound { .. }) => {
                self.record(AuditRecord::failed(key.as_str(), actor, AuditAction::Read, e.to_string()))
                    .await?;
                Ok(None)
            }
            Err(e) => self.fail(key, actor, AuditAction::Read, e).await,
        }
    }

    async fn fetch_usable(&self, key: &SecretKey, actor: &Actor) -> Result<Option<SecretEntry>> {
        let mut tx = self.begin(key).await?;
        let sql = format!("SELECT {} FROM secret_entries WHERE secret_key = ?", ENTRY_COLUMNS);
        let row = sqlx::query_as::<_, SecretEntryRow>(&sql)
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| SecretsError::from_sqlx(format!("lookup of '{}'", key), e))?;

        let Some(row) = row else {
            return Err(SecretsError::not_found(key.as_str()));
        };
        let entry = SecretEntry::try_from(row)?;
        if !entry.is_usable(Utc::now()) {
            tracing::debug!(
                secret_key = %key,
                is_active = entry.is_active,
                expires_at = ?entry.expires_at,
                "Stored secret is inactive or expired"
            );
            return Ok(None);
        }

        let entry = match touch(&mut tx, key).await? {
            Some(row) => SecretEntry::try_from(row)?,
            None => return Err(SecretsError::not_found(key.as_str())),
        };
        AuditLogRepository::append_with(
            &mut *tx,
            &AuditRecord::success(key.as_str(), actor, AuditAction::Read),
        )
        .await?;
        Self::commit(tx, key).await?;
        Ok(Some(entry))
    }

    /// Create or replace an entry. The value is always encrypted here;
    /// a soft-deleted entry is re-activated.
    #[instrument(skip(self, secret, actor), fields(secret_key = %secret.key, category = %secret.category, actor = %actor.user_id), name = "db_put_secret")]
    pub async fn put(&self, secret: NewSecret, actor: &Actor) -> Result<SecretEntry> {
        match self.upsert(&secret, actor).await {
            Ok(entry) => {
                tracing::info!(
                    secret_key = %entry.key,
                    category = %entry.category,
                    version = entry.version,
                    "Stored secret"
                );
                Ok(entry)
            }
            Err(e) => self.fail(&secret.key, actor, AuditAction::Write, e).await,
        }
    }

    async fn upsert(&self, secret: &NewSecret, actor: &Actor) -> Result<SecretEntry> {
        self.ensure_storable(&secret.key)?;

        let encrypted = self.encryption.encrypt(secret.value.expose_secret())?;
        let now = Utc::now();

        let sql = format!(
            "INSERT INTO secret_entries (secret_key, category, encrypted_value, key_version, description, \
             is_active, version, created_at, updated_at, expires_at, created_by, updated_by) \
             VALUES (?, ?, ?, ?, ?, 1, 1, ?, ?, ?, ?, ?) \
             ON CONFLICT(secret_key) DO UPDATE SET \
                 category = excluded.category, \
                 encrypted_value = excluded.encrypted_value, \
                 key_version = excluded.key_version, \
                 description = COALESCE(excluded.description, secret_entries.description), \
                 is_active = 1, \
                 version = secret_entries.version + 1, \
                 updated_at = excluded.updated_at, \
                 expires_at = excluded.expires_at, \
                 updated_by = excluded.updated_by \
             RETURNING {}",
            ENTRY_COLUMNS
        );

        let mut tx = self.begin(&secret.key).await?;
        let previous = current_ciphertext(&mut tx, &secret.key, false).await?;

        let row = sqlx::query_as::<_, SecretEntryRow>(&sql)
            .bind(secret.key.as_str())
            .bind(secret.category.as_str())
            .bind(&encrypted)
            .bind(self.encryption.key_version())
            .bind(&secret.description)
            .bind(now)
            .bind(now)
            .bind(secret.expires_at)
            .bind(&actor.user_id)
            .bind(&actor.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, secret_key = %secret.key, "Failed to store secret");
                SecretsError::from_sqlx(format!("write of '{}'", secret.key), e)
            })?;
        let entry = SecretEntry::try_from(row)?;

        let record = self.change_record(
            &secret.key,
            actor,
            AuditAction::Write,
            &secret.value,
            previous.as_deref(),
        );
        AuditLogRepository::append_with(&mut *tx, &record).await?;
        Self::commit(tx, &secret.key).await?;
        Ok(entry)
    }

    /// Replace the value of an existing active entry.
    #[instrument(skip(self, value, actor), fields(secret_key = %key, actor = %actor.user_id), name = "db_rotate_secret")]
    pub async fn rotate(
        &self,
        key: &SecretKey,
        value: &SecretString,
        actor: &Actor,
    ) -> Result<SecretEntry> {
        match self.replace_value(key, value, actor).await {
            Ok(entry) => {
                tracing::info!(secret_key = %key, version = entry.version, "Rotated secret");
                Ok(entry)
            }
            Err(e) => self.fail(key, actor, AuditAction::Rotate, e).await,
        }
    }

    async fn replace_value(
        &self,
        key: &SecretKey,
        value: &SecretString,
        actor: &Actor,
    ) -> Result<SecretEntry> {
        self.ensure_storable(key)?;

        let encrypted = self.encryption.encrypt(value.expose_secret())?;
        let mut tx = self.begin(key).await?;
        let Some(previous) = current_ciphertext(&mut tx, key, true).await? else {
            return Err(SecretsError::not_found(key.as_str()));
        };

        let sql = format!(
            "UPDATE secret_entries SET encrypted_value = ?, key_version = ?, version = version + 1, \
             updated_at = ?, updated_by = ? WHERE secret_key = ? AND is_active = 1 RETURNING {}",
            ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<_, SecretEntryRow>(&sql)
            .bind(&encrypted)
            .bind(self.encryption.key_version())
            .bind(Utc::now())
            .bind(&actor.user_id)
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| SecretsError::from_sqlx(format!("rotation of '{}'", key), e))?;

        let entry = match row {
            Some(row) => SecretEntry::try_from(row)?,
            None => return Err(SecretsError::not_found(key.as_str())),
        };

        let record = self.change_record(key, actor, AuditAction::Rotate, value, Some(&previous));
        AuditLogRepository::append_with(&mut *tx, &record).await?;
        Self::commit(tx, key).await?;
        Ok(entry)
    }

    /// Soft-delete an entry. Deactivating an inactive entry is a no-op success.
    #[instrument(skip(self, actor), fields(secret_key = %key, actor = %actor.user_id), name = "db_deactivate_secret")]
    pub async fn deactivate(&self, key: &SecretKey, actor: &Actor) -> Result<()> {
        match self.set_active(key, actor, false).await {
            Ok(_) => {
                tracing::info!(secret_key = %key, "Deactivated secret");
                Ok(())
            }
            Err(e) => self.fail(key, actor, AuditAction::Deactivate, e).await,
        }
    }

    /// Re-enable a soft-deleted entry with its stored value.
    #[instrument(skip(self, actor), fields(secret_key = %key, actor = %actor.user_id), name = "db_reactivate_secret")]
    pub async fn reactivate(&self, key: &SecretKey, actor: &Actor) -> Result<SecretEntry> {
        match self.set_active(key, actor, true).await {
            Ok(entry) => {
                tracing::info!(secret_key = %key, version = entry.version, "Reactivated secret");
                Ok(entry)
            }
            Err(e) => self.fail(key, actor, AuditAction::Reactivate, e).await,
        }
    }

    async fn set_active(&self, key: &SecretKey, actor: &Actor, active: bool) -> Result<SecretEntry> {
        let action = if active { AuditAction::Reactivate } else { AuditAction::Deactivate };
        let sql = format!(
            "UPDATE secret_entries SET is_active = ?, updated_at = ?, updated_by = ? \
             WHERE secret_key = ? RETURNING {}",
            ENTRY_COLUMNS
        );

        let mut tx = self.begin(key).await?;
        let row = sqlx::query_as::<_, SecretEntryRow>(&sql)
            .bind(active)
            .bind(Utc::now())
            .bind(&actor.user_id)
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| SecretsError::from_sqlx(format!("{} of '{}'", action, key), e))?;

        let entry = match row {
            Some(row) => SecretEntry::try_from(row)?,
            None => return Err(SecretsError::not_found(key.as_str())),
        };
        AuditLogRepository::append_with(&mut *tx, &AuditRecord::success(key.as_str(), actor, action))
            .await?;
        Self::commit(tx, key).await?;
        Ok(entry)
    }

    /// Success record for a value change, hashing the new value and, when it
    /// can still be opened, the value it replaced.
    fn change_record(
        &self,
        key: &SecretKey,
        actor: &Actor,
        action: AuditAction,
        value: &SecretString,
        previous_ciphertext: Option<&str>,
    ) -> AuditRecord {
        let record = AuditRecord::success(key.as_str(), actor, action).with_value(value.expose_secret());
        let Some(ciphertext) = previous_ciphertext else {
            return record;
        };

        match self.encryption.decrypt(ciphertext) {
            Ok(old) => record.with_old_value(old.expose_secret()),
            Err(e) => {
                tracing::warn!(secret_key = %key, error = %e, "Replaced value could not be decrypted; old value hash omitted");
                record
            }
        }
    }

    /// Stream metadata of active entries, ordered by category then key.
    ///
    /// Rows are pulled from the database as the stream is polled; the stream
    /// cannot be restarted.
    pub fn list(
        &self,
        category: Option<SecretCategory>,
    ) -> impl Stream<Item = Result<SecretMetadata>> + Send + '_ {
        async_stream::try_stream! {
            let sql = format!(
                "SELECT {} FROM secret_entries WHERE is_active = 1 AND (?1 IS NULL OR category = ?1) \
                 ORDER BY category, secret_key",
                ENTRY_COLUMNS
            );
            let mut rows = sqlx::query_as::<_, SecretEntryRow>(&sql)
                .bind(category.map(|c| c.as_str()))
                .fetch(&self.pool);

            while let Some(row) = rows
                .try_next()
                .await
                .map_err(|e| SecretsError::from_sqlx("listing secrets", e))?
            {
                yield SecretEntry::try_from(row)?.metadata();
            }
        }
    }

    /// Decrypt an entry's value.
    pub fn decrypt(&self, entry: &SecretEntry) -> Result<SecretString> {
        self.encryption.decrypt(&entry.encrypted_value).map_err(|e| {
            self.metrics.record_decryption_failure();
            tracing::error!(
                secret_key = %entry.key,
                key_version = %entry.key_version,
                error = %e,
                "Failed to decrypt stored secret"
            );
            SecretsError::decryption(entry.key.as_str(), e)
        })
    }

    fn ensure_storable(&self, key: &SecretKey) -> Result<()> {
        if self.is_critical(key) {
            return Err(SecretsError::invalid_key(
                key.as_str(),
                "critical keys must be supplied through injected files or the environment",
            ));
        }
        Ok(())
    }
}

/// Bump the access counters of an entry and return it.
async fn touch(conn: &mut SqliteConnection, key: &SecretKey) -> Result<Option<SecretEntryRow>> {
    let sql = format!(
        "UPDATE secret_entries SET access_count = access_count + 1, last_accessed_at = ? \
         WHERE secret_key = ? RETURNING {}",
        ENTRY_COLUMNS
    );
    sqlx::query_as::<_, SecretEntryRow>(&sql)
        .bind(Utc::now())
        .bind(key.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, secret_key = %key, "Failed to get secret");
            SecretsError::from_sqlx(format!("lookup of '{}'", key), e)
        })
}

async fn current_ciphertext(
    conn: &mut SqliteConnection,
    key: &SecretKey,
    active_only: bool,
) -> Result<Option<String>> {
    sqlx::query_scalar(
        "SELECT encrypted_value FROM secret_entries WHERE secret_key = ? AND (is_active = 1 OR ? = 0)",
    )
    .bind(key.as_str())
    .bind(active_only)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| SecretsError::from_sqlx(format!("lookup of '{}'", key), e))
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("encryption", &self.encryption)
            .field("critical_keys", &self.critical_keys.len())
            .finish()
    }
}
