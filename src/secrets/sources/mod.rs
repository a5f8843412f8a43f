//! Resolution tiers.
//!
//! Each tier answers one question: does it hold a value for this key?
//! `Ok(None)` means "absent here, ask the next tier"; an `Err` stops
//! resolution outright.

mod database;
mod env;
mod file;

pub use database::DatabaseSource;
pub use env::EnvSource;
pub use file::FileSource;

use async_trait::async_trait;

use super::error::Result;
use super::types::{SecretKey, SecretString, SecretTier};

/// One tier of the resolution chain.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// The tier this source represents.
    fn tier(&self) -> SecretTier;

    /// Look up a key. Absent values are `Ok(None)`.
    async fn fetch(&self, key: &SecretKey) -> Result<Option<SecretString>>;
}
