//! Typed settings populated through the [`Resolver`].
//!
//! Each struct names the keys it reads and the defaults it applies. Values
//! that fail to parse are reported as [`SecretsError::InvalidValue`] rather
//! than silently replaced by the default.

use std::str::FromStr;
use std::time::Duration;

use super::error::{Result, SecretsError};
use super::resolver::Resolver;
use super::types::{SecretKey, SecretString};
use crate::config::parse_bool;

async fn optional(resolver: &Resolver, key: &str) -> Result<Option<SecretString>> {
    resolver.resolve_optional(&SecretKey::parse(key)?).await
}

async fn text(resolver: &Resolver, key: &str) -> Result<Option<String>> {
    Ok(optional(resolver, key).await?.map(|v| v.expose_secret().to_string()))
}

async fn flag(resolver: &Resolver, key: &str, default: bool) -> Result<bool> {
    Ok(optional(resolver, key).await?.map(|v| parse_bool(v.expose_secret())).unwrap_or(default))
}

async fn parsed<T>(resolver: &Resolver, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(resolver, key).await? {
        Some(raw) => raw
            .expose_secret()
            .trim()
            .parse::<T>()
            .map_err(|e| SecretsError::invalid_value(key, e.to_string())),
        None => Ok(default),
    }
}

/// Outbound mail relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub server: Option<String>,
    pub port: u16,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub default_sender: Option<String>,
    pub enabled: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            server: None,
            port: 587,
            use_tls: true,
            use_ssl: false,
            username: None,
            password: None,
            default_sender: None,
            enabled: false,
        }
    }
}

impl SmtpSettings {
    pub async fn load(resolver: &Resolver) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            server: text(resolver, "SMTP_SERVER").await?,
            port: parsed(resolver, "SMTP_PORT", defaults.port).await?,
            use_tls: flag(resolver, "SMTP_USE_TLS", defaults.use_tls).await?,
            use_ssl: flag(resolver, "SMTP_USE_SSL", defaults.use_ssl).await?,
            username: text(resolver, "SMTP_USERNAME").await?,
            password: optional(resolver, "SMTP_PASSWORD").await?,
            default_sender: text(resolver, "MAIL_DEFAULT_SENDER").await?,
            enabled: flag(resolver, "SMTP_ENABLED", defaults.enabled).await?,
        })
    }

    /// Enabled and pointing at a server.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.server.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// ServiceNow integration settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNowSettings {
    pub instance_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub timeout: Duration,
    pub assignment_groups: Vec<String>,
    pub enabled: bool,
}

impl Default for ServiceNowSettings {
    fn default() -> Self {
        Self {
            instance_url: None,
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            assignment_groups: Vec::new(),
            enabled: true,
        }
    }
}

impl ServiceNowSettings {
    pub async fn load(resolver: &Resolver) -> Result<Self> {
        let defaults = Self::default();
        let timeout_secs: u64 =
            parsed(resolver, "SERVICENOW_TIMEOUT", defaults.timeout.as_secs()).await?;
        let assignment_groups = text(resolver, "SERVICENOW_ASSIGNMENT_GROUPS")
            .await?
            .map(|raw| {
                raw.split(',').map(str::trim).filter(|g| !g.is_empty()).map(str::to_string).collect()
            })
            .unwrap_or_default();

        Ok(Self {
            instance_url: text(resolver, "SERVICENOW_INSTANCE_URL").await?,
            username: text(resolver, "SERVICENOW_USERNAME").await?,
            password: optional(resolver, "SERVICENOW_PASSWORD").await?,
            timeout: Duration::from_secs(timeout_secs),
            assignment_groups,
            enabled: flag(resolver, "SERVICENOW_ENABLED", defaults.enabled).await?,
        })
    }

    /// Enabled with instance and credentials present.
    pub fn is_configured(&self) -> bool {
        self.enabled
            && self.instance_url.is_some()
            && self.username.is_some()
            && self.password.is_some()
    }
}

/// Feature toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub servicenow_integration: bool,
    pub ctask_assignment: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { servicenow_integration: true, ctask_assignment: true }
    }
}

impl FeatureFlags {
    pub async fn load(resolver: &Resolver) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            servicenow_integration: flag(
                resolver,
                "FEATURE_SERVICENOW_INTEGRATION",
                defaults.servicenow_integration,
            )
            .await?,
            ctask_assignment: flag(resolver, "FEATURE_CTASK_ASSIGNMENT", defaults.ctask_assignment)
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_for(dir: &std::path::Path) -> Resolver {
        Resolver::builder().secrets_dir(dir).env_prefix(Some("SETTINGS_TEST_NONE_".into())).build()
    }

    #[tokio::test]
    async fn test_defaults_when_nothing_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_for(dir.path());

        assert_eq!(SmtpSettings::load(&resolver).await.unwrap(), SmtpSettings::default());
        assert_eq!(ServiceNowSettings::load(&resolver).await.unwrap(), ServiceNowSettings::default());
        assert_eq!(FeatureFlags::load(&resolver).await.unwrap(), FeatureFlags::default());
    }

    #[tokio::test]
    async fn test_values_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [
            ("smtp_server", "mail.example.com"),
            ("smtp_port", "465\n"),
            ("smtp_use_ssl", "yes"),
            ("smtp_use_tls", "off"),
            ("smtp_enabled", "Enabled"),
            ("smtp_password", "pw"),
            ("servicenow_timeout", "10"),
            ("servicenow_assignment_groups", "Network, Ops ,,DBA"),
            ("feature_ctask_assignment", "false"),
        ] {
            std::fs::write(dir.path().join(name), value).unwrap();
        }
        let resolver = resolver_for(dir.path());

        let smtp = SmtpSettings::load(&resolver).await.unwrap();
        assert_eq!(smtp.server.as_deref(), Some("mail.example.com"));
        assert_eq!(smtp.port, 465);
        assert!(smtp.use_ssl && !smtp.use_tls && smtp.enabled);
        assert!(smtp.is_configured());
        assert_eq!(smtp.password.unwrap().expose_secret(), "pw");

        let snow = ServiceNowSettings::load(&resolver).await.unwrap();
        assert_eq!(snow.timeout, Duration::from_secs(10));
        assert_eq!(snow.assignment_groups, vec!["Network", "Ops", "DBA"]);
        assert!(!snow.is_configured());

        let flags = FeatureFlags::load(&resolver).await.unwrap();
        assert!(flags.servicenow_integration);
        assert!(!flags.ctask_assignment);
    }

    #[tokio::test]
    async fn test_unparseable_number_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("smtp_port"), "not-a-port").unwrap();
        let resolver = resolver_for(dir.path());

        let err = SmtpSettings::load(&resolver).await.unwrap_err();
        assert!(matches!(err, SecretsError::InvalidValue { ref key, .. } if key == "SMTP_PORT"));
    }
}
