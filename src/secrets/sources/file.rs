//! Orchestrator-injected secret files (`/run/secrets/<name>`).

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::SecretSource;
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::{SecretKey, SecretString, SecretTier};

/// Reads `<dir>/<key lower-case>`, then `<dir>/<KEY>`.
///
/// Trailing `\n` and `\r` characters are stripped; everything else in the
/// file is the value. A missing file or directory means absent; a file that
/// exists but cannot be read is an error.
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read(&self, key: &SecretKey, path: &Path) -> Result<Option<SecretString>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(None)
            }
            Err(e) => {
                return Err(SecretsError::SourceUnreadable {
                    key: key.to_string(),
                    tier: SecretTier::InjectedFile,
                    message: format!("{}: {}", path.display(), e),
                })
            }
        };

        let mut value = String::from_utf8(bytes).map_err(|_| SecretsError::SourceUnreadable {
            key: key.to_string(),
            tier: SecretTier::InjectedFile,
            message: format!("{} is not valid UTF-8", path.display()),
        })?;

        let trimmed_len = value.trim_end_matches(['\n', '\r']).len();
        value.truncate(trimmed_len);
        Ok(Some(SecretString::new(value)))
    }
}

#[async_trait]
impl SecretSource for FileSource {
    fn tier(&self) -> SecretTier {
        SecretTier::InjectedFile
    }

    async fn fetch(&self, key: &SecretKey) -> Result<Option<SecretString>> {
        for name in key.file_names() {
            let path = self.dir.join(&name);
            if let Some(value) = self.read(key, &path).await? {
                tracing::debug!(secret_key = %key, path = %path.display(), "Found injected secret file");
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> SecretKey {
        SecretKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_reads_lowercase_file_and_strips_newlines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("smtp_password"), "s3cret \n\r\n").unwrap();

        let source = FileSource::new(dir.path());
        let value = source.fetch(&key("SMTP_PASSWORD")).await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), "s3cret ");
    }

    #[tokio::test]
    async fn test_lowercase_wins_over_uppercase() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api_key"), "lower").unwrap();
        std::fs::write(dir.path().join("API_KEY"), "upper").unwrap();

        let source = FileSource::new(dir.path());
        let value = source.fetch(&key("api_key")).await.unwrap().unwrap();
        // Case-insensitive filesystems collapse both names into one file.
        assert!(value.expose_secret() == "lower" || value.expose_secret() == "upper");
    }

    #[tokio::test]
    async fn test_falls_back_to_uppercase_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SERVICENOW_USERNAME"), "svc\n").unwrap();

        let source = FileSource::new(dir.path());
        let value = source.fetch(&key("servicenow_username")).await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), "svc");
    }

    #[tokio::test]
    async fn test_missing_file_and_directory_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSource::new(dir.path()).fetch(&key("NOPE")).await.unwrap().is_none());
        assert!(FileSource::new(dir.path().join("missing"))
            .fetch(&key("NOPE"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("binary"), [0xff, 0xfe, 0x00]).unwrap();

        let err = FileSource::new(dir.path()).fetch(&key("BINARY")).await.unwrap_err();
        assert!(matches!(err, SecretsError::SourceUnreadable { .. }));
    }

    #[tokio::test]
    async fn test_empty_file_is_an_empty_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty_flag"), "\n").unwrap();

        let value = FileSource::new(dir.path()).fetch(&key("EMPTY_FLAG")).await.unwrap().unwrap();
        assert!(value.is_empty());
    }
}
