//! # Database Migration Management
//!
//! Migrations under `migrations/` are embedded in the binary at compile time
//! and applied on startup when `auto_migrate` is enabled.

use crate::errors::{Error, Result};
use crate::storage::DbPool;
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::Row;
use tracing::{error, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Migration information structure
#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub installed_on: chrono::DateTime<chrono::Utc>,
    pub execution_time: i64,
}

/// Run all pending database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!(available = MIGRATOR.iter().count(), "Starting database migration process");

    MIGRATOR.run(pool).await.map_err(|e| {
        error!(error = %e, "Migration failed");
        Error::Migration { source: e, context: "Failed to apply embedded migrations".to_string() }
    })?;

    info!("Database migrations completed");
    Ok(())
}

/// Number of migrations compiled into the binary.
pub fn embedded_migration_count() -> usize {
    MIGRATOR.iter().count()
}

/// List all applied migrations
pub async fn list_applied_migrations(pool: &DbPool) -> Result<Vec<MigrationInfo>> {
    let rows = sqlx::query(
        "SELECT version, description, installed_on, execution_time FROM _sqlx_migrations \
         WHERE success = 1 ORDER BY version",
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(rows) => rows
            .into_iter()
            .map(|row| {
                Ok(MigrationInfo {
                    version: row.try_get("version")?,
                    description: row.try_get("description")?,
                    installed_on: row.try_get("installed_on")?,
                    execution_time: row.try_get("execution_time")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| Error::Database {
                source: e,
                context: "Failed to decode applied migrations".to_string(),
            }),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("no such table") => {
            Ok(Vec::new())
        }
        Err(e) => Err(Error::Database {
            source: e,
            context: "Failed to list applied migrations".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::memory_pool;

    #[tokio::test]
    async fn test_migrations_apply_and_are_listed() {
        let pool = memory_pool().await;
        let applied = list_applied_migrations(&pool).await.unwrap();

        assert_eq!(applied.len(), embedded_migration_count());
        assert!(applied.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
    }
}
