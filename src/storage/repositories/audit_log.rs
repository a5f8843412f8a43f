//! Audit log repository for secret access and administration.
//!
//! The `audit_log` table is append-only: the schema aborts any `UPDATE` or
//! `DELETE`. Entries name the secret and hashes of the old and new values,
//! never the values themselves.
//!
//! Appends take any SQLite executor so that a store mutation and its audit
//! entry can share one transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, Sqlite};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::instrument;

use crate::secrets::{Result, SecretKey, SecretsError};
use crate::storage::DbPool;

/// Default and maximum number of entries returned by a query.
pub const DEFAULT_AUDIT_LIMIT: i64 = 100;
pub const MAX_AUDIT_LIMIT: i64 = 1000;

/// User id recorded for operations performed by the process itself.
pub const SYSTEM_ACTOR: &str = "system";

/// What was attempted against a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Read,
    Write,
    Rotate,
    Deactivate,
    Reactivate,
    Test,
    Export,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Read => "read",
            AuditAction::Write => "write",
            AuditAction::Rotate => "rotate",
            AuditAction::Deactivate => "deactivate",
            AuditAction::Reactivate => "reactivate",
            AuditAction::Test => "test",
            AuditAction::Export => "export",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "read" => Ok(AuditAction::Read),
            "write" => Ok(AuditAction::Write),
            "rotate" => Ok(AuditAction::Rotate),
            "deactivate" => Ok(AuditAction::Deactivate),
            "reactivate" => Ok(AuditAction::Reactivate),
            "test" => Ok(AuditAction::Test),
            "export" => Ok(AuditAction::Export),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

/// How the attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "denied" => Ok(AuditOutcome::Denied),
            "failed" => Ok(AuditOutcome::Failed),
            other => Err(format!("unknown audit outcome '{}'", other)),
        }
    }
}

/// Who performed an operation, as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub source_ip: Option<IpAddr>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), source_ip: None }
    }

    /// The process itself (boot-time resolution, migrations).
    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR)
    }

    pub fn with_source_ip(mut self, source_ip: IpAddr) -> Self {
        self.source_ip = Some(source_ip);
        self
    }
}

/// An audit entry about to be appended.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub secret_key: String,
    pub actor: Actor,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub value_hash: Option<String>,
    pub old_value_hash: Option<String>,
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn success(secret_key: impl Into<String>, actor: &Actor, action: AuditAction) -> Self {
        Self {
            secret_key: secret_key.into(),
            actor: actor.clone(),
            action,
            outcome: AuditOutcome::Success,
            value_hash: None,
            old_value_hash: None,
            detail: None,
        }
    }

    pub fn failed(
        secret_key: impl Into<String>,
        actor: &Actor,
        action: AuditAction,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            outcome: AuditOutcome::Failed,
            detail: Some(detail.into()),
            ..Self::success(secret_key, actor, action)
        }
    }

    pub fn denied(
        secret_key: impl Into<String>,
        actor: &Actor,
        action: AuditAction,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            outcome: AuditOutcome::Denied,
            detail: Some(detail.into()),
            ..Self::success(secret_key, actor, action)
        }
    }

    /// Attach the hash of the value written by this operation.
    pub fn with_value(mut self, value: &str) -> Self {
        self.value_hash = Some(hash_value(value));
        self
    }

    /// Attach the hash of the value this operation replaced.
    pub fn with_old_value(mut self, old_value: &str) -> Self {
        self.old_value_hash = Some(hash_value(old_value));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A stored audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub secret_key: String,
    pub actor_user_id: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, FromRow)]
struct AuditLogRow {
    id: i64,
    secret_key: String,
    actor_user_id: String,
    action: String,
    outcome: String,
    timestamp: DateTime<Utc>,
    source_ip: Option<String>,
    value_hash: Option<String>,
    old_value_hash: Option<String>,
    detail: Option<String>,
}

impl TryFrom<AuditLogRow> for AuditLogEntry {
    type Error = SecretsError;

    fn try_from(row: AuditLogRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            action: row.action.parse().map_err(SecretsError::internal)?,
            outcome: row.outcome.parse().map_err(SecretsError::internal)?,
            secret_key: row.secret_key,
            actor_user_id: row.actor_user_id,
            timestamp: row.timestamp,
            source_ip: row.source_ip,
            value_hash: row.value_hash,
            old_value_hash: row.old_value_hash,
            detail: row.detail,
        })
    }
}

/// Filter for reading the audit log.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub secret_key: Option<SecretKey>,
    pub limit: i64,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self { secret_key: None, limit: DEFAULT_AUDIT_LIMIT }
    }
}

impl AuditQuery {
    pub fn for_key(secret_key: SecretKey) -> Self {
        Self { secret_key: Some(secret_key), ..Default::default() }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// SHA-256 hex digest of a value, for audit correlation without disclosure.
pub fn hash_value(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Repository for the append-only audit log.
#[derive(Debug, Clone)]
pub struct AuditLogRepository {
    pool: DbPool,
}

impl AuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one entry, returning its id.
    pub async fn append(&self, record: &AuditRecord) -> Result<i64> {
        Self::append_with(&self.pool, record).await
    }

    /// Append one entry through `executor`, typically an open transaction.
    #[instrument(
        skip(executor, record),
        fields(secret_key = %record.secret_key, action = %record.action, outcome = %record.outcome),
        name = "db_append_audit"
    )]
    pub async fn append_with<'e, E>(executor: E, record: &AuditRecord) -> Result<i64>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT INTO audit_log (secret_key, actor_user_id, action, outcome, timestamp, source_ip, \
             value_hash, old_value_hash, detail) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.secret_key)
        .bind(&record.actor.user_id)
        .bind(record.action.as_str())
        .bind(record.outcome.as_str())
        .bind(Utc::now())
        .bind(record.actor.source_ip.map(|ip| ip.to_string()))
        .bind(&record.value_hash)
        .bind(&record.old_value_hash)
        .bind(&record.detail)
        .execute(executor)
        .await
        .map_err(|e| SecretsError::from_sqlx("Failed to write secrets audit event", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Newest entries first, optionally for a single key.
    #[instrument(skip(self), name = "db_query_audit")]
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        let limit = query.limit.clamp(1, MAX_AUDIT_LIMIT);

        let rows = sqlx::query_as::<_, AuditLogRow>(
            "SELECT id, secret_key, actor_user_id, action, outcome, timestamp, source_ip, value_hash, \
             old_value_hash, detail FROM audit_log WHERE (?1 IS NULL OR secret_key = ?1) \
             ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(query.secret_key.as_ref().map(SecretKey::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretsError::from_sqlx("Failed to query audit log", e))?;

        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }

    /// Number of entries, optionally for a single key.
    pub async fn count(&self, secret_key: Option<&SecretKey>) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE (?1 IS NULL OR secret_key = ?1)")
            .bind(secret_key.map(SecretKey::as_str))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SecretsError::from_sqlx("Failed to count audit log", e))
    }
}
