//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;

/// A stored email row, in the shape the HTTP API serves.
#[derive(Debug, Clone, Serialize)]
pub struct EmailRecord {
    pub id: i64,
    pub message_id: String,
    pub from_address: String,
    /// Resolved destination; may be a comma-joined list from the To-header
    /// fallback, or empty when resolution found nothing.
    pub to_address: String,
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A new email ready for insertion.
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub message_id: String,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Outcome of a deduplicated insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Whether a new row was created (`false` means the `message_id` was
    /// already stored — an expected outcome under at-least-once delivery).
    pub inserted: bool,
    /// Rowid of the new record when one was created.
    pub id: Option<i64>,
}

/// A routing service record from the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub name: String,
    /// Single substring matched against `from_address`.
    pub sender_filter: String,
    /// `|`-delimited subject substring alternatives; empty = no constraint.
    pub subject_filter: String,
}

/// Backend-agnostic database trait covering emails and services.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Emails ──────────────────────────────────────────────────────

    /// Insert an email, deduplicated on `message_id`. A duplicate is
    /// reported as `inserted = false`, never as an error.
    async fn insert_email(&self, email: &NewEmail) -> Result<InsertOutcome, DatabaseError>;

    /// All emails addressed to `local_part` under any of the given domains,
    /// plus unaddressed emails (empty/NULL `to_address`), minus anything
    /// from `excluded_sender`. Ordered by `received_at` descending.
    async fn emails_for_address(
        &self,
        local_part: &str,
        domains: &[String],
        excluded_sender: &str,
    ) -> Result<Vec<EmailRecord>, DatabaseError>;

    /// Delete emails whose `received_at` precedes `now - age`.
    /// Returns the number of rows removed.
    async fn delete_older_than(&self, age: chrono::Duration) -> Result<u64, DatabaseError>;

    // ── Services ────────────────────────────────────────────────────

    /// List all routing services.
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, DatabaseError>;

    /// Look up a service by id.
    async fn get_service(&self, id: i64) -> Result<Option<ServiceRecord>, DatabaseError>;

    /// Look up a service by exact name.
    async fn get_service_by_name(&self, name: &str)
    -> Result<Option<ServiceRecord>, DatabaseError>;

    /// Create a service; returns its new id.
    async fn create_service(
        &self,
        name: &str,
        sender_filter: &str,
        subject_filter: &str,
    ) -> Result<i64, DatabaseError>;

    /// Replace a service's filters. `NotFound` if the id has no row.
    async fn update_service(
        &self,
        id: i64,
        sender_filter: &str,
        subject_filter: &str,
    ) -> Result<(), DatabaseError>;
}
