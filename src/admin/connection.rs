//! Connectivity probes behind the admin "test connection" action.
//!
//! The probe is chosen from the key prefix:
//!
//! - `SMTP_*` / `MAIL_*`: run the SMTP handshake against the configured
//!   relay (EHLO, STARTTLS or implicit TLS as configured, AUTH with the
//!   resolved credentials, NOOP), then `QUIT`.
//! - `SERVICENOW_*`: authenticated `GET /api/now/table/sys_user?sysparm_limit=1`.
//! - anything else: resolve the key and report the value's length only.
//!
//! Probes never return errors. Every failure, including a timeout, becomes an
//! unsuccessful [`ConnectionTestReport`].

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::secrets::{
    Resolver, Result, SecretKey, SecretsError, ServiceNowSettings, SmtpSettings,
};

/// Default upper bound for a single probe.
pub const DEFAULT_CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(5);

const SMTP_PREFIXES: &[&str] = &["SMTP_", "MAIL_"];
const SERVICENOW_PREFIXES: &[&str] = &["SERVICENOW_"];
const SERVICENOW_PROBE_PATH: &str = "/api/now/table/sys_user";

/// Which probe applies to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Smtp,
    ServiceNow,
    Value,
}

impl ProbeKind {
    pub fn for_key(key: &SecretKey) -> Self {
        if key.has_prefix(SMTP_PREFIXES) {
            ProbeKind::Smtp
        } else if key.has_prefix(SERVICENOW_PREFIXES) {
            ProbeKind::ServiceNow
        } else {
            ProbeKind::Value
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Smtp => "smtp",
            ProbeKind::ServiceNow => "servicenow",
            ProbeKind::Value => "value",
        }
    }
}

/// Non-sensitive description of a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueInfo {
    pub length: usize,
    pub is_empty: bool,
}

/// Outcome of a connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTestReport {
    pub key: SecretKey,
    pub probe: ProbeKind,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_info: Option<ValueInfo>,
}

impl ConnectionTestReport {
    fn new(key: &SecretKey, probe: ProbeKind, success: bool, message: impl Into<String>) -> Self {
        Self {
            key: key.clone(),
            probe,
            success,
            message: message.into(),
            latency_ms: None,
            value_info: None,
        }
    }
}

/// Runs probes with a shared HTTP client and timeout.
#[derive(Debug, Clone)]
pub struct ConnectionTester {
    client: reqwest::Client,
    timeout: Duration,
}

impl ConnectionTester {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SecretsError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe whatever `key` configures.
    #[instrument(skip(self, resolver), fields(secret_key = %key, probe = tracing::field::Empty))]
    pub async fn test(&self, resolver: &Resolver, key: &SecretKey) -> ConnectionTestReport {
        let probe = ProbeKind::for_key(key);
        tracing::Span::current().record("probe", probe.as_str());

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.run(probe, resolver, key)).await;

        let mut report = match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => ConnectionTestReport::new(key, probe, false, e.to_string()),
            Err(_) => ConnectionTestReport::new(
                key,
                probe,
                false,
                format!("Timed out after {}s", self.timeout.as_secs_f64()),
            ),
        };
        report.latency_ms = Some(duration_ms(started.elapsed()));

        if report.success {
            debug!(secret_key = %key, message = %report.message, "Connection test passed");
        } else {
            warn!(secret_key = %key, message = %report.message, "Connection test failed");
        }
        report
    }

    async fn run(
        &self,
        probe: ProbeKind,
        resolver: &Resolver,
        key: &SecretKey,
    ) -> Result<ConnectionTestReport> {
        match probe {
            ProbeKind::Smtp => {
                let settings = SmtpSettings::load(resolver).await?;
                Ok(probe_smtp(key, &settings, self.timeout).await)
            }
            ProbeKind::ServiceNow => {
                let settings = ServiceNowSettings::load(resolver).await?;
                Ok(self.probe_servicenow(key, &settings).await)
            }
            ProbeKind::Value => probe_value(resolver, key).await,
        }
    }

    async fn probe_servicenow(
        &self,
        key: &SecretKey,
        settings: &ServiceNowSettings,
    ) -> ConnectionTestReport {
        let fail = |message: String| ConnectionTestReport::new(key, ProbeKind::ServiceNow, false, message);

        let (Some(instance), Some(username), Some(password)) =
            (&settings.instance_url, &settings.username, &settings.password)
        else {
            return fail("ServiceNow instance URL, username and password must all be set".into());
        };

        let url = match servicenow_probe_url(instance) {
            Ok(url) => url,
            Err(e) => return fail(e),
        };

        let response = self
            .client
            .get(url)
            .basic_auth(username, Some(password.expose_secret()))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => ConnectionTestReport::new(
                key,
                ProbeKind::ServiceNow,
                true,
                format!("ServiceNow responded with {}", response.status()),
            ),
            Ok(response) if response.status() == reqwest::StatusCode::UNAUTHORIZED => {
                fail("ServiceNow rejected the configured credentials".into())
            }
            Ok(response) => fail(format!("ServiceNow responded with {}", response.status())),
            Err(e) => fail(format!("ServiceNow request failed: {}", e)),
        }
    }
}

/// Build the probe URL for a ServiceNow instance. Bare host names get `https://`.
pub fn servicenow_probe_url(instance: &str) -> std::result::Result<Url, String> {
    let instance = instance.trim().trim_end_matches('/');
    let with_scheme = if instance.contains("://") {
        instance.to_string()
    } else {
        format!("https://{}", instance)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| format!("Invalid ServiceNow instance URL '{}': {}", instance, e))?;
    url.set_path(SERVICENOW_PROBE_PATH);
    url.set_query(Some("sysparm_limit=1"));
    Ok(url)
}

/// Whole milliseconds, saturating instead of wrapping.
fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn smtp_transport(
    server: &str,
    settings: &SmtpSettings,
    timeout: Duration,
) -> std::result::Result<AsyncSmtpTransport<Tokio1Executor>, String> {
    let tls = if settings.use_ssl || settings.use_tls {
        let parameters = TlsParameters::new(server.to_string())
            .map_err(|e| format!("Invalid TLS parameters for {}: {}", server, e))?;
        if settings.use_ssl {
            Tls::Wrapper(parameters)
        } else {
            Tls::Required(parameters)
        }
    } else {
        Tls::None
    };

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server)
        .port(settings.port)
        .tls(tls)
        .timeout(Some(timeout));
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        builder = builder
            .credentials(Credentials::new(username.clone(), password.expose_secret().to_string()));
    }
    Ok(builder.build())
}

async fn probe_smtp(key: &SecretKey, settings: &SmtpSettings, timeout: Duration) -> ConnectionTestReport {
    let fail = |message: String| ConnectionTestReport::new(key, ProbeKind::Smtp, false, message);

    let Some(server) = settings.server.as_deref().filter(|s| !s.is_empty()) else {
        return fail("SMTP_SERVER is not configured".into());
    };

    let transport = match smtp_transport(server, settings, timeout) {
        Ok(transport) => transport,
        Err(e) => return fail(e),
    };
    let authenticated = settings.username.is_some() && settings.password.is_some();

    match transport.test_connection().await {
        Ok(true) => ConnectionTestReport::new(
            key,
            ProbeKind::Smtp,
            true,
            if authenticated {
                format!("SMTP server {}:{} accepted the configured credentials", server, settings.port)
            } else {
                format!("SMTP server {}:{} is ready (no credentials configured)", server, settings.port)
            },
        ),
        Ok(false) => fail(format!("SMTP server {}:{} did not answer NOOP", server, settings.port)),
        Err(e) => fail(format!("SMTP check against {}:{} failed: {}", server, settings.port, e)),
    }
}

async fn probe_value(resolver: &Resolver, key: &SecretKey) -> Result<ConnectionTestReport> {
    let Some(resolved) = resolver.resolve_entry(key).await? else {
        return Ok(ConnectionTestReport::new(
            key,
            ProbeKind::Value,
            false,
            format!("'{}' is not set in any source", key),
        ));
    };

    let mut report = ConnectionTestReport::new(
        key,
        ProbeKind::Value,
        true,
        format!("'{}' resolved from {}", key, resolved.source),
    );
    report.value_info =
        Some(ValueInfo { length: resolved.value.len(), is_empty: resolved.value.is_empty() });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use wiremock::matchers::{basic_auth, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key(raw: &str) -> SecretKey {
        SecretKey::parse(raw).unwrap()
    }

    fn resolver_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Resolver) {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in files {
            std::fs::write(dir.path().join(name), value).unwrap();
        }
        let resolver = Resolver::builder()
            .secrets_dir(dir.path())
            .env_prefix(Some("CONNECTION_TEST_NONE_".into()))
            .build();
        (dir, resolver)
    }

    #[test]
    fn test_probe_kind_from_prefix() {
        assert_eq!(ProbeKind::for_key(&key("SMTP_PASSWORD")), ProbeKind::Smtp);
        assert_eq!(ProbeKind::for_key(&key("mail_default_sender")), ProbeKind::Smtp);
        assert_eq!(ProbeKind::for_key(&key("SERVICENOW_USERNAME")), ProbeKind::ServiceNow);
        assert_eq!(ProbeKind::for_key(&key("OAUTH_CLIENT_ID")), ProbeKind::Value);
    }

    #[test]
    fn test_servicenow_probe_url() {
        let url = servicenow_probe_url("acme.service-now.com").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acme.service-now.com/api/now/table/sys_user?sysparm_limit=1"
        );

        let url = servicenow_probe_url("http://127.0.0.1:8080/").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/now/table/sys_user?sysparm_limit=1");

        assert!(servicenow_probe_url("https://bad host").is_err());
    }

    /// Scripted relay: answers EHLO with AUTH PLAIN, accepts only
    /// `user`/`pass`, and returns the commands it saw (AUTH payload elided).
    async fn fake_relay(user: &'static str, pass: &'static str) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            writer.write_all(b"220 relay.example.com ESMTP\r\n").await.unwrap();

            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply: &[u8] = if line.starts_with("EHLO") {
                    b"250-relay.example.com\r\n250 AUTH PLAIN LOGIN\r\n"
                } else if let Some(payload) = line.strip_prefix("AUTH PLAIN ") {
                    let decoded = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
                    if decoded == format!("\0{}\0{}", user, pass).into_bytes() {
                        b"235 2.7.0 Authentication successful\r\n"
                    } else {
                        b"535 5.7.8 Authentication credentials invalid\r\n"
                    }
                } else if line == "NOOP" {
                    b"250 2.0.0 OK\r\n"
                } else if line == "QUIT" {
                    b"221 2.0.0 Bye\r\n"
                } else {
                    b"502 5.5.2 Command not recognized\r\n"
                };
                seen.push(if line.starts_with("AUTH PLAIN") { "AUTH PLAIN".to_string() } else { line.clone() });
                writer.write_all(reply).await.unwrap();
                if line == "QUIT" {
                    break;
                }
            }
            seen
        });
        (port, server)
    }

    #[tokio::test]
    async fn test_smtp_check_authenticates_with_resolved_credentials() {
        let (port, server) = fake_relay("relay-user", "relay-pass").await;
        let (_dir, resolver) = resolver_with(&[
            ("smtp_server", "127.0.0.1"),
            ("smtp_port", &port.to_string()),
            ("smtp_use_tls", "false"),
            ("smtp_username", "relay-user"),
            ("smtp_password", "relay-pass\n"),
        ]);
        let tester = ConnectionTester::new(Duration::from_secs(2)).unwrap();

        let report = tester.test(&resolver, &key("SMTP_PASSWORD")).await;
        assert!(report.success, "{}", report.message);
        assert!(report.latency_ms.is_some());
        assert!(report.message.contains("accepted"));

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("EHLO"));
        assert!(seen.contains(&"AUTH PLAIN".to_string()));
        assert_eq!(seen.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn test_smtp_check_fails_on_wrong_password() {
        let (port, _server) = fake_relay("relay-user", "relay-pass").await;
        let (_dir, resolver) = resolver_with(&[
            ("smtp_server", "127.0.0.1"),
            ("smtp_port", &port.to_string()),
            ("smtp_use_tls", "false"),
            ("smtp_username", "relay-user"),
            ("smtp_password", "DEFINITELY-WRONG"),
        ]);
        let tester = ConnectionTester::new(Duration::from_secs(2)).unwrap();

        let report = tester.test(&resolver, &key("SMTP_PASSWORD")).await;
        assert!(!report.success);
        assert!(report.message.contains("535"), "{}", report.message);
        assert!(!report.message.contains("DEFINITELY-WRONG"));
    }

    #[tokio::test]
    async fn test_smtp_probe_rejects_bad_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"554 go away\r\n").await.unwrap();
        });

        let (_dir, resolver) = resolver_with(&[
            ("smtp_server", "127.0.0.1"),
            ("smtp_port", &port.to_string()),
            ("smtp_use_tls", "false"),
        ]);
        let tester = ConnectionTester::new(Duration::from_secs(2)).unwrap();

        let report = tester.test(&resolver, &key("SMTP_SERVER")).await;
        assert!(!report.success);
        assert!(report.message.contains("554"), "{}", report.message);
    }

    #[tokio::test]
    async fn test_smtp_probe_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (_dir, resolver) = resolver_with(&[
            ("smtp_server", "127.0.0.1"),
            ("smtp_port", &port.to_string()),
            ("smtp_use_tls", "false"),
        ]);
        let tester = ConnectionTester::new(Duration::from_millis(200)).unwrap();

        let report = tester.test(&resolver, &key("SMTP_SERVER")).await;
        assert!(!report.success);
        assert!(report.message.to_lowercase().contains("time"), "{}", report.message);
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_smtp_probe_without_server() {
        let (_dir, resolver) = resolver_with(&[]);
        let tester = ConnectionTester::new(DEFAULT_CONNECTION_TEST_TIMEOUT).unwrap();

        let report = tester.test(&resolver, &key("SMTP_SERVER")).await;
        assert!(!report.success);
        assert!(report.message.contains("SMTP_SERVER"));
    }

    #[tokio::test]
    async fn test_servicenow_probe_uses_basic_auth() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/now/table/sys_user"))
            .and(query_param("sysparm_limit", "1"))
            .and(basic_auth("svc_handover", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": []})))
            .expect(1)
            .mount(&mock)
            .await;

        let (_dir, resolver) = resolver_with(&[
            ("servicenow_instance_url", &mock.uri()),
            ("servicenow_username", "svc_handover"),
            ("servicenow_password", "s3cret\n"),
        ]);
        let tester = ConnectionTester::new(Duration::from_secs(2)).unwrap();

        let report = tester.test(&resolver, &key("SERVICENOW_PASSWORD")).await;
        assert!(report.success, "{}", report.message);
        assert_eq!(report.probe, ProbeKind::ServiceNow);
    }

    #[tokio::test]
    async fn test_servicenow_probe_reports_rejected_credentials() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/now/table/sys_user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock)
            .await;

        let (_dir, resolver) = resolver_with(&[
            ("servicenow_instance_url", &mock.uri()),
            ("servicenow_username", "svc_handover"),
            ("servicenow_password", "wrong"),
        ]);
        let tester = ConnectionTester::new(Duration::from_secs(2)).unwrap();

        let report = tester.test(&resolver, &key("SERVICENOW_INSTANCE_URL")).await;
        assert!(!report.success);
        assert!(report.message.contains("credentials"));
    }

    #[tokio::test]
    async fn test_value_probe_reports_length_only() {
        let (_dir, resolver) = resolver_with(&[("oauth_client_id", "abcdef")]);
        let tester = ConnectionTester::new(DEFAULT_CONNECTION_TEST_TIMEOUT).unwrap();

        let report = tester.test(&resolver, &key("OAUTH_CLIENT_ID")).await;
        assert!(report.success);
        assert_eq!(report.value_info, Some(ValueInfo { length: 6, is_empty: false }));
        assert!(!report.message.contains("abcdef"));

        let missing = tester.test(&resolver, &key("OAUTH_CLIENT_SECRET")).await;
        assert!(!missing.success);
        assert!(missing.value_info.is_none());
    }
}
