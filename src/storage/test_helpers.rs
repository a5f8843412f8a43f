//! Test database utilities for in-library tests.
//!
//! Each call creates a fresh in-memory SQLite database with all migrations
//! applied, so tests are fully isolated from one another.
//!
//! This module is only available in test builds (`#[cfg(test)]`).

use crate::config::DatabaseConfig;
use crate::storage::{create_pool, DbPool};

/// Fresh in-memory database with migrations applied.
pub async fn memory_pool() -> DbPool {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        auto_migrate: true,
        ..Default::default()
    };
    create_pool(&config).await.expect("create in-memory test pool")
}
