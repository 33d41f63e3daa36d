//! Mailbox connector — owns the lifecycle of the upstream IMAP session.
//!
//! One long-lived task drives the state machine
//! `Disconnected → Connecting → Idle → Fetching → Idle → …`, reconnecting
//! after a short fixed delay on any failure, indefinitely. No other
//! component opens a competing session.

pub mod session;

pub use session::{IdleOutcome, ImapSession};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ImapConfig;
use crate::error::ImapError;
use crate::ingest::Ingestor;

/// Delay before reconnecting after an established session drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Delay before retrying after a failed connection attempt.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(10);
/// How often an IDLE wait is re-issued so the server keeps the session.
const IDLE_REFRESH: Duration = Duration::from_secs(600);

/// Connector lifecycle states; transitions are logged at debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorState {
    Disconnected,
    Connecting,
    Idle,
    Fetching,
}

/// Connector settings beyond the session credentials.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub imap: ImapConfig,
    /// Catch-up fetch horizon, aligned with the retention window so no
    /// message that could still be legally stored is missed.
    pub retention: chrono::Duration,
    /// Poll cadence used when the server lacks IDLE.
    pub poll_interval: Duration,
}

/// Spawn the background connector task.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop the
/// connector at its next state transition.
pub fn spawn_mailbox_connector(
    config: ConnectorConfig,
    ingestor: Ingestor,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let ingestor = Arc::new(ingestor);

    let handle = tokio::spawn(async move {
        info!(
            host = %config.imap.host,
            port = config.imap.port,
            "Mailbox connector started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Mailbox connector shutting down");
                return;
            }

            debug!(state = ?ConnectorState::Connecting, "Connector state");
            match run_connection(&config, &ingestor, &shutdown).await {
                Ok(()) => {
                    debug!(state = ?ConnectorState::Disconnected, "Connector state");
                    if shutdown.load(Ordering::Relaxed) {
                        info!("Mailbox connector shutting down");
                        return;
                    }
                    info!(delay_secs = RECONNECT_DELAY.as_secs(), "IMAP session ended; reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                Err(e) => {
                    debug!(state = ?ConnectorState::Disconnected, "Connector state");
                    error!(
                        delay_secs = CONNECT_RETRY_DELAY.as_secs(),
                        "IMAP connection failed: {e}; retrying"
                    );
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    });

    (handle, shutdown_flag)
}

/// Connect, then stream fetch batches out of the blocking session into the
/// ingest routine until the session ends.
///
/// `Err` means the connection attempt itself failed. A session that drops
/// after establishment is logged and returns `Ok(())`, taking the shorter
/// reconnect path.
async fn run_connection(
    config: &ConnectorConfig,
    ingestor: &Arc<Ingestor>,
    shutdown: &Arc<AtomicBool>,
) -> Result<(), ImapError> {
    let imap = config.imap.clone();
    let session = tokio::task::spawn_blocking(move || ImapSession::connect(&imap))
        .await
        .map_err(|e| ImapError::Protocol(format!("connect task panicked: {e}")))??;

    info!(idle = session.supports_idle(), "IMAP connected");

    let (batch_tx, mut batch_rx) = tokio::sync::mpsc::channel::<Vec<Vec<u8>>>(4);
    let retention = config.retention;
    let poll_interval = config.poll_interval;
    let stop = Arc::clone(shutdown);
    let worker = tokio::task::spawn_blocking(move || {
        session_loop(session, retention, poll_interval, batch_tx, stop)
    });

    while let Some(batch) = batch_rx.recv().await {
        let stats = ingestor.ingest_batch(&batch).await;
        info!(
            fetched = batch.len(),
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            skipped = stats.skipped,
            "Ingested fetch batch"
        );
    }

    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("IMAP session ended: {e}"),
        Err(e) => error!("IMAP session task panicked: {e}"),
    }
    Ok(())
}

/// Blocking session loop: catch-up fetch, then IDLE- or timer-triggered
/// fetches until the connection drops or shutdown is requested. Both
/// trigger modes run the identical fetch-and-ingest routine.
fn session_loop(
    mut session: ImapSession,
    retention: chrono::Duration,
    poll_interval: Duration,
    batch_tx: tokio::sync::mpsc::Sender<Vec<Vec<u8>>>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), ImapError> {
    debug!(state = ?ConnectorState::Fetching, "Connector state");
    fetch_and_send(&mut session, retention, &batch_tx)?;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            session.logout();
            return Ok(());
        }

        debug!(state = ?ConnectorState::Idle, "Connector state");
        let new_mail = if session.supports_idle() {
            matches!(session.idle_wait(IDLE_REFRESH)?, IdleOutcome::NewMail)
        } else {
            std::thread::sleep(poll_interval);
            true
        };

        if !new_mail {
            continue;
        }

        debug!(state = ?ConnectorState::Fetching, "Connector state");
        fetch_and_send(&mut session, retention, &batch_tx)?;
    }
}

/// One fetch cycle: search since the retention horizon, fetch each hit,
/// ship the batch to the async ingest side. Per-message fetch faults are
/// logged and skipped; connection-level faults end the session.
fn fetch_and_send(
    session: &mut ImapSession,
    retention: chrono::Duration,
    batch_tx: &tokio::sync::mpsc::Sender<Vec<Vec<u8>>>,
) -> Result<(), ImapError> {
    let horizon = Utc::now() - retention;
    let ids = session.search_since(horizon)?;
    if ids.is_empty() {
        return Ok(());
    }
    debug!(count = ids.len(), "Fetching messages since retention horizon");

    let mut batch = Vec::with_capacity(ids.len());
    for id in ids {
        match session.fetch_rfc822(id) {
            Ok(raw) => batch.push(raw),
            Err(e @ (ImapError::Closed | ImapError::Io(_))) => return Err(e),
            Err(e) => warn!(seq = id, "Failed to fetch message: {e}"),
        }
    }

    // A closed receiver means the async side is tearing down; not an error.
    let _ = batch_tx.blocking_send(batch);
    Ok(())
}
