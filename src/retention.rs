//! Retention enforcement — periodic deletion of expired messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::store::Database;

/// First sweep runs this long after startup, before the interval kicks in.
const STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Spawn a background task that deletes messages older than `window`,
/// once shortly after startup and then on every `interval` tick.
///
/// A failed sweep is logged and the schedule continues — retention lapses
/// self-correct on the next tick.
pub fn spawn_retention_task(
    db: Arc<dyn Database>,
    window: chrono::Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            window_hours = window.num_hours(),
            interval_secs = interval.as_secs(),
            "Retention enforcer started"
        );

        tokio::time::sleep(STARTUP_DELAY).await;
        run_sweep(&db, window).await;

        let mut tick = tokio::time::interval(interval);
        // The first tick completes immediately; the startup sweep covered it.
        tick.tick().await;
        loop {
            tick.tick().await;
            run_sweep(&db, window).await;
        }
    })
}

async fn run_sweep(db: &Arc<dyn Database>, window: chrono::Duration) {
    match db.delete_older_than(window).await {
        Ok(0) => debug!("Retention sweep found nothing to delete"),
        Ok(count) => info!(count, "Deleted expired messages"),
        Err(e) => error!("Retention sweep failed: {e}"),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LibSqlBackend, NewEmail};
    use chrono::Utc;

    fn make_email(message_id: &str, age_hours: i64) -> NewEmail {
        NewEmail {
            message_id: message_id.into(),
            from_address: "a@x.com".into(),
            to_address: "alice@tmp.test".into(),
            subject: None,
            text_body: None,
            html_body: None,
            received_at: Utc::now() - chrono::Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_rows() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.insert_email(&make_email("fresh", 0)).await.unwrap();
        db.insert_email(&make_email("old", 25)).await.unwrap();

        run_sweep(&db, chrono::Duration::hours(24)).await;

        let remaining = db
            .emails_for_address("alice", &["tmp.test".into()], "")
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_id, "fresh");
    }

    #[tokio::test]
    async fn sweep_with_nothing_to_delete_is_not_an_error() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        // Must simply not panic.
        run_sweep(&db, chrono::Duration::hours(24)).await;
    }
}
