//! Repository implementations for the secrets layer.

pub mod audit_log;
pub mod secret;

pub use audit_log::{
    hash_value, Actor, AuditAction, AuditLogEntry, AuditLogRepository, AuditOutcome, AuditQuery,
    AuditRecord, SYSTEM_ACTOR,
};
pub use secret::SecretStore;
