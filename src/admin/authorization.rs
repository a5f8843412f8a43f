//! Role-based capability check for administrative operations.
//!
//! Roles are ranked `user < account_admin < super_admin`. A principal
//! satisfies a requirement when its role ranks at or above the required one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::secrets::{Result, SecretsError};
use crate::storage::Actor;

/// Application role, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    AccountAdmin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::AccountAdmin => "account_admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "user" => Ok(Role::User),
            "account_admin" => Ok(Role::AccountAdmin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!(
                "unknown role '{}' (expected user, account_admin or super_admin)",
                other
            )),
        }
    }
}

/// The caller of an administrative operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    pub source_ip: Option<IpAddr>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self { user_id: user_id.into(), role, source_ip: None }
    }

    pub fn with_source_ip(mut self, source_ip: IpAddr) -> Self {
        self.source_ip = Some(source_ip);
        self
    }

    /// How this principal appears in the audit log.
    pub fn actor(&self) -> Actor {
        Actor { user_id: self.user_id.clone(), source_ip: self.source_ip }
    }
}

/// Whether `principal` holds at least `required`.
pub fn requires_role(principal: &Principal, required: Role) -> bool {
    principal.role >= required
}

/// [`requires_role`] as a `Result`, producing [`SecretsError::Forbidden`] on denial.
pub fn require_role(
    principal: &Principal,
    required: Role,
    action: &str,
    key: &str,
) -> Result<()> {
    if requires_role(principal, required) {
        Ok(())
    } else {
        Err(SecretsError::Forbidden {
            actor: principal.user_id.clone(),
            action: action.to_string(),
            key: key.to_string(),
            required: required.to_string(),
        })
    }
}
