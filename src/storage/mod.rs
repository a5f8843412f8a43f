//! # Storage and Persistence
//!
//! SQLite persistence for encrypted secret entries and the audit log.

pub mod migrations;
pub mod pool;
pub mod repositories;

#[cfg(test)]
pub mod test_helpers;

pub use crate::config::DatabaseConfig;

pub use migrations::{list_applied_migrations, run_migrations, MigrationInfo};
pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{
    Actor, AuditAction, AuditLogEntry, AuditLogRepository, AuditOutcome, AuditQuery, AuditRecord,
    SecretStore, SYSTEM_ACTOR,
};

use crate::errors::{Error, Result};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| Error::Database {
        source: e,
        context: "Database connectivity check failed".to_string(),
    })?;

    Ok(())
}
