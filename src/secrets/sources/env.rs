//! Process environment tier.

use async_trait::async_trait;
use std::env::{self, VarError};

use super::SecretSource;
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::{SecretKey, SecretString, SecretTier};

/// Reads `<PREFIX><KEY>` from the process environment.
///
/// An unset or empty variable is absent.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()) }
    }

    /// Converts a secret key to the environment variable name.
    pub fn var_name(&self, key: &SecretKey) -> String {
        key.env_var(self.prefix.as_deref())
    }
}

#[async_trait]
impl SecretSource for EnvSource {
    fn tier(&self) -> SecretTier {
        SecretTier::Environment
    }

    async fn fetch(&self, key: &SecretKey) -> Result<Option<SecretString>> {
        let name = self.var_name(key);
        match env::var(&name) {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => Ok(Some(SecretString::new(value))),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(SecretsError::SourceUnreadable {
                key: key.to_string(),
                tier: SecretTier::Environment,
                message: format!("{} is not valid unicode", name),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_upper_case_variable() {
        env::set_var("ENVSOURCE_TEST_PLAIN", "value-1");
        let source = EnvSource::new();

        let value = source.fetch(&SecretKey::parse("envsource_test_plain").unwrap()).await.unwrap();
        assert_eq!(value.unwrap().expose_secret(), "value-1");
        env::remove_var("ENVSOURCE_TEST_PLAIN");
    }

    #[tokio::test]
    async fn test_prefix_is_applied() {
        env::set_var("HANDOVER_ENVSOURCE_TEST_PREFIXED", "prefixed");
        env::set_var("ENVSOURCE_TEST_PREFIXED", "bare");
        let source = EnvSource::with_prefix("handover_");

        let key = SecretKey::parse("ENVSOURCE_TEST_PREFIXED").unwrap();
        assert_eq!(source.var_name(&key), "HANDOVER_ENVSOURCE_TEST_PREFIXED");
        assert_eq!(source.fetch(&key).await.unwrap().unwrap().expose_secret(), "prefixed");

        env::remove_var("HANDOVER_ENVSOURCE_TEST_PREFIXED");
        env::remove_var("ENVSOURCE_TEST_PREFIXED");
    }

    #[tokio::test]
    async fn test_unset_and_empty_are_absent() {
        env::set_var("ENVSOURCE_TEST_EMPTY", "");
        let source = EnvSource::new();

        assert!(source.fetch(&SecretKey::parse("ENVSOURCE_TEST_EMPTY").unwrap()).await.unwrap().is_none());
        assert!(source.fetch(&SecretKey::parse("ENVSOURCE_TEST_UNSET").unwrap()).await.unwrap().is_none());
        env::remove_var("ENVSOURCE_TEST_EMPTY");
    }
}
