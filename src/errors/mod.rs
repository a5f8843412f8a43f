//! # Error Handling
//!
//! Crate-level error handling. Boot, configuration, pool and migration
//! failures are reported through [`Error`]; the secrets domain has its own
//! taxonomy in [`crate::secrets::SecretsError`].

pub mod types;

pub use types::{Error, Result};
