use std::sync::Arc;
use std::time::Duration;

use mailsink::api::{ApiState, api_routes};
use mailsink::config::Config;
use mailsink::imap::{ConnectorConfig, spawn_mailbox_connector};
use mailsink::ingest::Ingestor;
use mailsink::resolver::AddressResolver;
use mailsink::retention::spawn_retention_task;
use mailsink::store::{Database, LibSqlBackend};

/// Retention sweeps run hourly.
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env();

    eprintln!("📬 mailsink v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   HTTP API: http://0.0.0.0:{}/api", config.http_port);
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Domains: {}",
        if config.served_domains.is_empty() {
            "(none configured)".to_string()
        } else {
            config.served_domains.join(", ")
        }
    );

    if config.served_domains.is_empty() {
        tracing::warn!(
            "MAILSINK_DOMAINS is empty — forwarding headers will never resolve a destination"
        );
    }

    // ── Database ─────────────────────────────────────────────────────
    let db: Arc<dyn Database> =
        Arc::new(LibSqlBackend::new_local(std::path::Path::new(&config.db_path)).await?);

    // ── Retention enforcer ───────────────────────────────────────────
    let _retention = spawn_retention_task(Arc::clone(&db), config.retention, RETENTION_INTERVAL);

    // ── Mailbox connector ────────────────────────────────────────────
    if let Some(imap) = config.imap.clone() {
        eprintln!("   IMAP: {}:{}", imap.host, imap.port);
        let resolver = AddressResolver::new(config.served_domains.clone());
        let ingestor = Ingestor::new(Arc::clone(&db), resolver);
        let _connector = spawn_mailbox_connector(
            ConnectorConfig {
                imap,
                retention: config.retention,
                poll_interval: config.poll_interval,
            },
            ingestor,
        );
    } else {
        eprintln!("   IMAP: disabled (MAILSINK_IMAP_HOST not set)");
        tracing::warn!("Mailbox connector disabled — serving stored mail only");
    }

    // ── HTTP API ─────────────────────────────────────────────────────
    let state = ApiState {
        db,
        served_domains: config.served_domains,
        excluded_sender: config.excluded_sender,
    };
    let app = api_routes(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tracing::info!(port = config.http_port, "HTTP API listening");
    axum::serve(listener, app).await?;

    Ok(())
}
