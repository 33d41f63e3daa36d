//! Configuration, built from environment variables.

use std::time::Duration;

/// IMAP mailbox connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Bound on the TCP connect + TLS handshake phase. A slow or
    /// unreachable server fails fast and falls into the reconnect path.
    pub connect_timeout: Duration,
}

impl ImapConfig {
    /// Build config from environment variables.
    /// Returns `None` if `MAILSINK_IMAP_HOST` is not set (connector disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MAILSINK_IMAP_HOST").ok()?;

        let port: u16 = std::env::var("MAILSINK_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("MAILSINK_IMAP_USER").unwrap_or_default();
        let password = std::env::var("MAILSINK_IMAP_PASS").unwrap_or_default();

        let connect_timeout_secs: u64 = std::env::var("MAILSINK_IMAP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Some(Self {
            host,
            port,
            username,
            password,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }
}

/// Service-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream mailbox; `None` leaves the connector disabled (HTTP still serves).
    pub imap: Option<ImapConfig>,
    /// Domains this installation serves. Forwarding-header tokens outside
    /// this allow-list are rejected by the address resolver.
    pub served_domains: Vec<String>,
    /// System mailbox address filtered out of every inbox view.
    pub excluded_sender: String,
    /// Messages older than this are deleted; also bounds the connector's
    /// catch-up fetch horizon.
    pub retention: chrono::Duration,
    /// Poll cadence used when the server does not support IDLE.
    pub poll_interval: Duration,
    pub http_port: u16,
    pub db_path: String,
}

impl Config {
    /// Build the full service config from environment variables,
    /// falling back to defaults for everything optional.
    pub fn from_env() -> Self {
        let served_domains: Vec<String> = std::env::var("MAILSINK_DOMAINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let excluded_sender = std::env::var("MAILSINK_EXCLUDED_SENDER").unwrap_or_default();

        let retention_hours: i64 = std::env::var("MAILSINK_RETENTION_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(24);

        let poll_interval_secs: u64 = std::env::var("MAILSINK_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let http_port: u16 = std::env::var("MAILSINK_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3001);

        let db_path =
            std::env::var("MAILSINK_DB_PATH").unwrap_or_else(|_| "./data/mailsink.db".to_string());

        Self {
            imap: ImapConfig::from_env(),
            served_domains,
            excluded_sender,
            retention: chrono::Duration::hours(retention_hours),
            poll_interval: Duration::from_secs(poll_interval_secs),
            http_port,
            db_path,
        }
    }
}
