//! Integration tests for tiered resolution against real sources
//!
//! Injected files live in a temporary directory, environment variables use a
//! per-test prefix and database entries go through an in-memory store.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{admin, key, store_with, TestEnv};
use handover_secrets::secrets::{
    FeatureFlags, NewSecret, Resolver, SecretCategory, SecretString, SecretTier, SecretsError,
    SmtpSettings,
};
use futures::TryStreamExt;
use handover_secrets::services::{generate_master_key, SecretEncryptionConfig};
use handover_secrets::storage::{AuditAction, AuditOutcome, AuditQuery, SYSTEM_ACTOR};
use std::sync::Arc;

#[tokio::test]
async fn test_priority_file_env_database_default() {
    let env = TestEnv::new().await;
    for name in ["SMTP_SERVER", "SMTP_USERNAME", "SMTP_PORT"] {
        env.console
            .put(&admin(), NewSecret::new(key(name), SecretCategory::AppConfig, "from-db"))
            .await
            .unwrap();
    }
    env.set_env("SMTP_SERVER", "from-env");
    env.set_env("SMTP_USERNAME", "from-env");
    env.write_file("smtp_server", "from-file\n");

    let server = env.resolver.resolve(&key("SMTP_SERVER"), Some("default")).await.unwrap();
    assert_eq!(server.value.expose_secret(), "from-file");
    assert_eq!(server.source, SecretTier::InjectedFile);

    let username = env.resolver.resolve(&key("SMTP_USERNAME"), Some("default")).await.unwrap();
    assert_eq!(username.value.expose_secret(), "from-env");
    assert_eq!(username.source, SecretTier::Environment);

    let port = env.resolver.resolve(&key("SMTP_PORT"), Some("587")).await.unwrap();
    assert_eq!(port.value.expose_secret(), "from-db");
    assert_eq!(port.source, SecretTier::Database);

    let sender = env.resolver.resolve(&key("MAIL_DEFAULT_SENDER"), Some("noreply@example.com")).await.unwrap();
    assert_eq!(sender.value.expose_secret(), "noreply@example.com");
    assert_eq!(sender.source, SecretTier::Default);

    env.remove_env("SMTP_SERVER");
    env.remove_env("SMTP_USERNAME");
}

#[tokio::test]
async fn test_lower_case_file_wins_over_upper_case() {
    let env = TestEnv::new().await;
    env.write_file("servicenow_username", "lower\r\n");
    env.write_file("SERVICENOW_USERNAME", "upper");

    let resolved = env.resolver.resolve(&key("ServiceNow_Username"), None).await.unwrap();
    assert_eq!(resolved.value.expose_secret(), "lower");
}

#[tokio::test]
async fn test_missing_required_key_is_named() {
    let env = TestEnv::new().await;
    env.write_file("smtp_server", "mail.example.com");

    let err = env
        .resolver
        .resolve_required(&[key("SMTP_SERVER"), key("SERVICENOW_INSTANCE_URL")])
        .await
        .unwrap_err();

    assert!(matches!(err, SecretsError::ConfigurationMissing { ref key } if key == "SERVICENOW_INSTANCE_URL"));
    assert!(err.to_string().contains("SERVICENOW_INSTANCE_URL"));
}

#[tokio::test]
async fn test_rotation_is_visible_to_next_resolve() {
    let env = TestEnv::new().await;
    let k = key("SERVICENOW_PASSWORD");
    env.console
        .put(&admin(), NewSecret::new(k.clone(), SecretCategory::ExternalApi, "v1"))
        .await
        .unwrap();

    assert_eq!(env.resolver.resolve(&k, None).await.unwrap().value.expose_secret(), "v1");
    assert_eq!(env.resolver.cached_tier(&k).await, Some(SecretTier::Database));

    env.console.rotate(&admin(), &k, SecretString::new("v2")).await.unwrap();
    assert_eq!(env.resolver.resolve(&k, None).await.unwrap().value.expose_secret(), "v2");
}

#[tokio::test]
async fn test_concurrent_resolves_never_see_stale_value_after_rotation() {
    let env = TestEnv::new().await;
    let k = key("API_TOKEN");
    env.console
        .put(&admin(), NewSecret::new(k.clone(), SecretCategory::ExternalApi, "old"))
        .await
        .unwrap();

    let readers: Vec<_> = (0..16)
        .map(|_| {
            let resolver = Arc::clone(&env.resolver);
            let k = k.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    resolver.resolve(&k, None).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    env.console.rotate(&admin(), &k, SecretString::new("new")).await.unwrap();
    for _ in 0..10 {
        assert_eq!(env.resolver.resolve(&k, None).await.unwrap().value.expose_secret(), "new");
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(env.resolver.resolve(&k, None).await.unwrap().value.expose_secret(), "new");
}

#[tokio::test]
async fn test_env_hits_are_cached_until_invalidated() {
    let env = TestEnv::new().await;
    let k = key("SMTP_ENABLED");
    env.set_env("SMTP_ENABLED", "true");
    assert_eq!(env.resolver.resolve(&k, None).await.unwrap().value.expose_secret(), "true");

    env.set_env("SMTP_ENABLED", "false");
    assert_eq!(env.resolver.resolve(&k, None).await.unwrap().value.expose_secret(), "true");

    env.resolver.invalidate(&k).await;
    assert_eq!(env.resolver.resolve(&k, None).await.unwrap().value.expose_secret(), "false");

    env.remove_env("SMTP_ENABLED");
}

#[tokio::test]
async fn test_inactive_and_expired_entries_fall_through() {
    let env = TestEnv::new().await;

    let expired = key("FEATURE_SERVICENOW_INTEGRATION");
    env.console
        .put(
            &admin(),
            NewSecret::new(expired.clone(), SecretCategory::FeatureFlag, "false")
                .with_expiry(Utc::now() - ChronoDuration::minutes(1)),
        )
        .await
        .unwrap();

    let inactive = key("FEATURE_CTASK_ASSIGNMENT");
    env.console
        .put(&admin(), NewSecret::new(inactive.clone(), SecretCategory::FeatureFlag, "false"))
        .await
        .unwrap();
    env.console.deactivate(&admin(), &inactive).await.unwrap();

    let flags = FeatureFlags::load(&env.resolver).await.unwrap();
    assert!(flags.servicenow_integration);
    assert!(flags.ctask_assignment);
}

#[tokio::test]
async fn test_critical_keys_never_come_from_database() {
    let env = TestEnv::new().await;

    let err = env
        .console
        .put(&admin(), NewSecret::new(key("DATABASE_URL"), SecretCategory::AppConfig, "sqlite://x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SecretsError::InvalidKey { .. }));

    let resolved = env.resolver.resolve(&key("DATABASE_URL"), Some("sqlite::memory:")).await.unwrap();
    assert_eq!(resolved.source, SecretTier::Default);
}

#[tokio::test]
async fn test_decryption_failure_does_not_fall_back_to_default() {
    let env = TestEnv::new().await;
    env.console
        .put(&admin(), NewSecret::new(key("SMTP_PASSWORD"), SecretCategory::ExternalApi, "pw"))
        .await
        .unwrap();

    let other_key = SecretEncryptionConfig::from_base64(generate_master_key().unwrap(), "rotated");
    let wrong_store = store_with(env.pool.clone(), other_key);
    let resolver = Resolver::builder()
        .env_prefix(Some(env.env_prefix.clone()))
        .store(wrong_store)
        .build();

    let err = resolver.resolve(&key("SMTP_PASSWORD"), Some("fallback")).await.unwrap_err();
    assert!(matches!(err, SecretsError::Decryption { .. }));
    assert_eq!(resolver.cache_len().await, 0);
}

#[tokio::test]
async fn test_typed_settings_mix_tiers() {
    let env = TestEnv::new().await;
    env.write_file("smtp_server", "relay.example.com");
    env.set_env("SMTP_PORT", "2525");
    env.console
        .put(&admin(), NewSecret::new(key("SMTP_PASSWORD"), SecretCategory::ExternalApi, "pw"))
        .await
        .unwrap();
    env.console
        .put(&admin(), NewSecret::new(key("SMTP_ENABLED"), SecretCategory::FeatureFlag, "yes"))
        .await
        .unwrap();

    let smtp = SmtpSettings::load(&env.resolver).await.unwrap();
    assert_eq!(smtp.server.as_deref(), Some("relay.example.com"));
    assert_eq!(smtp.port, 2525);
    assert_eq!(smtp.password.as_ref().map(|p| p.expose_secret()), Some("pw"));
    assert!(smtp.use_tls);
    assert!(smtp.is_configured());

    env.remove_env("SMTP_PORT");
}

#[tokio::test]
async fn test_uncached_file_env_and_default_hits_are_audited() {
    let env = TestEnv::new().await;
    env.write_file("smtp_server", "relay.example.com");
    env.set_env("SMTP_USERNAME", "mailer");

    for (name, expected) in [("SMTP_SERVER", "source=file"), ("SMTP_USERNAME", "source=env")] {
        let k = key(name);
        env.resolver.resolve(&k, None).await.unwrap();
        // Cached hits are not re-audited.
        env.resolver.resolve(&k, None).await.unwrap();

        let entries = env.store.audit_log().query(&AuditQuery::for_key(k.clone())).await.unwrap();
        assert_eq!(entries.len(), 1, "{}", name);
        assert_eq!(entries[0].action, AuditAction::Read);
        assert_eq!(entries[0].outcome, AuditOutcome::Success);
        assert_eq!(entries[0].actor_user_id, SYSTEM_ACTOR);
        assert_eq!(entries[0].detail.as_deref(), Some(expected));
        assert!(entries[0].value_hash.is_none());
    }

    let sender = key("MAIL_DEFAULT_SENDER");
    env.resolver.resolve(&sender, Some("noreply@example.com")).await.unwrap();
    let latest = &env.store.audit_log().query(&AuditQuery::for_key(sender)).await.unwrap()[0];
    assert_eq!(latest.outcome, AuditOutcome::Success);
    assert_eq!(latest.detail.as_deref(), Some("source=default"));

    env.remove_env("SMTP_USERNAME");
}

#[tokio::test]
async fn test_unusable_entries_are_audited_without_counting_as_access() {
    let env = TestEnv::new().await;

    let expired = key("FEATURE_SERVICENOW_INTEGRATION");
    env.console
        .put(
            &admin(),
            NewSecret::new(expired.clone(), SecretCategory::FeatureFlag, "false")
                .with_expiry(Utc::now() - ChronoDuration::minutes(1)),
        )
        .await
        .unwrap();
    let inactive = key("FEATURE_CTASK_ASSIGNMENT");
    env.console
        .put(&admin(), NewSecret::new(inactive.clone(), SecretCategory::FeatureFlag, "false"))
        .await
        .unwrap();
    env.console.deactivate(&admin(), &inactive).await.unwrap();

    for k in [&expired, &inactive] {
        let resolved = env.resolver.resolve(k, Some("true")).await.unwrap();
        assert_eq!(resolved.source, SecretTier::Default);

        let entries = env.store.audit_log().query(&AuditQuery::for_key(k.clone())).await.unwrap();
        assert!(entries.iter().any(|e| e.action == AuditAction::Read
            && e.outcome == AuditOutcome::Failed
            && e.detail.as_deref() == Some("entry is inactive or expired")));
    }

    let metadata: Vec<_> = env.store.list(None).try_collect().await.unwrap();
    for entry in metadata.iter().filter(|m| m.key == expired || m.key == inactive) {
        assert_eq!(entry.access_count, 0, "{}", entry.key);
        assert!(entry.last_accessed_at.is_none());
    }
}

#[tokio::test]
async fn test_store_outage_fails_uncached_lookups_only() {
    let env = TestEnv::new().await;
    let cached = key("SERVICENOW_PASSWORD");
    env.console
        .put(&admin(), NewSecret::new(cached.clone(), SecretCategory::ExternalApi, "pw"))
        .await
        .unwrap();
    env.resolver.resolve(&cached, None).await.unwrap();

    env.pool.close().await;

    let hit = env.resolver.resolve(&cached, None).await.unwrap();
    assert_eq!(hit.value.expose_secret(), "pw");

    let err = env.resolver.resolve(&key("SMTP_PORT"), Some("587")).await.unwrap_err();
    assert!(matches!(err, SecretsError::StoreUnavailable { .. }), "{:?}", err);
    assert_eq!(err.exit_code(), 69);
}
