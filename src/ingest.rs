//! Fetch-and-ingest routine shared by every connector trigger mode.
//!
//! Each raw message is parsed, its destination resolved, and the resulting
//! record inserted with dedup on `message_id`. A single message's parse or
//! insert failure is logged and skipped, never aborts the remaining batch.

use std::sync::Arc;

use chrono::Utc;
use mail_parser::{Message, MessageParser};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::resolver::AddressResolver;
use crate::store::{Database, NewEmail};

/// Counters for one ingested batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    /// New rows created.
    pub inserted: usize,
    /// Messages already stored (expected under at-least-once delivery).
    pub duplicates: usize,
    /// Messages dropped by a per-message parse or storage fault.
    pub skipped: usize,
}

/// Turns raw messages into stored email records.
pub struct Ingestor {
    db: Arc<dyn Database>,
    resolver: AddressResolver,
}

impl Ingestor {
    pub fn new(db: Arc<dyn Database>, resolver: AddressResolver) -> Self {
        Self { db, resolver }
    }

    /// Ingest a batch of raw messages in upstream order.
    pub async fn ingest_batch(&self, batch: &[Vec<u8>]) -> IngestStats {
        let parser = MessageParser::default();
        let mut stats = IngestStats::default();

        for raw in batch {
            let Some(message) = parser.parse(raw.as_slice()) else {
                warn!(bytes = raw.len(), "Unparseable message skipped");
                stats.skipped += 1;
                continue;
            };

            let email = self.build_record(&message);
            match self.db.insert_email(&email).await {
                Ok(outcome) if outcome.inserted => {
                    debug!(
                        message_id = %email.message_id,
                        to = %email.to_address,
                        "Message stored"
                    );
                    stats.inserted += 1;
                }
                Ok(_) => stats.duplicates += 1,
                Err(e) => {
                    warn!(message_id = %email.message_id, "Failed to store message: {e}");
                    stats.skipped += 1;
                }
            }
        }

        stats
    }

    /// Build the storable record from a parsed message.
    fn build_record(&self, message: &Message<'_>) -> NewEmail {
        let message_id = message
            .message_id()
            .map(String::from)
            .unwrap_or_else(|| format!("no-id-{}", Uuid::new_v4()));

        let received_at = message
            .date()
            .and_then(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        NewEmail {
            message_id,
            from_address: from_display(message),
            to_address: self.resolver.resolve(message),
            subject: Some(
                message
                    .subject()
                    .map(String::from)
                    .unwrap_or_else(|| "(No Subject)".to_string()),
            ),
            text_body: message.body_text(0).map(|t| t.to_string()),
            html_body: message.body_html(0).map(|h| h.to_string()),
            received_at,
        }
    }
}

/// Sender in display form ("Name <addr>"), matching what header-derived
/// free text looks like downstream in the filter engine.
fn from_display(message: &Message<'_>) -> String {
    let Some(first) = message.from().and_then(|a| a.first()) else {
        return "unknown".to_string();
    };
    match (&first.name, &first.address) {
        (Some(name), Some(addr)) => format!("{name} <{addr}>"),
        (None, Some(addr)) => addr.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
