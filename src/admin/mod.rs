//! # Secrets Administration
//!
//! Role-gated operations for managing stored secrets: listing, reading,
//! writing, rotation, deactivation, connection tests, exports and the audit
//! log. All of them share a single capability check.

pub mod authorization;
pub mod connection;
pub mod console;

pub use authorization::{require_role, requires_role, Principal, Role};
pub use connection::{
    ConnectionTestReport, ConnectionTester, ProbeKind, ValueInfo, DEFAULT_CONNECTION_TEST_TIMEOUT,
};
pub use console::{AdminConsole, CategorySummary, MetadataExport, RevealedSecret, ALL_SECRETS};
