//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. `libsql::Connection` is
//! `Send + Sync` and safe for concurrent async use; the UNIQUE constraint
//! on `emails.message_id` serializes racing inserts for the same message
//! into exactly one success.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Database, EmailRecord, InsertOutcome, NewEmail, ServiceRecord};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(v: Option<&str>) -> Value {
    match v {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Column order shared by every email SELECT:
/// 0:id, 1:message_id, 2:from_address, 3:to_address, 4:subject,
/// 5:text_body, 6:html_body, 7:received_at
const EMAIL_COLUMNS: &str =
    "id, message_id, from_address, to_address, subject, text_body, html_body, received_at";

fn row_to_email(row: &libsql::Row) -> Result<EmailRecord, libsql::Error> {
    let received_str: String = row.get(7)?;
    Ok(EmailRecord {
        id: row.get(0)?,
        message_id: row.get(1)?,
        from_address: row.get(2)?,
        to_address: row.get::<String>(3).unwrap_or_default(),
        subject: row.get(4).ok(),
        text_body: row.get(5).ok(),
        html_body: row.get(6).ok(),
        received_at: parse_datetime(&received_str),
    })
}

fn row_to_service(row: &libsql::Row) -> Result<ServiceRecord, libsql::Error> {
    Ok(ServiceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        sender_filter: row.get::<String>(2).unwrap_or_default(),
        subject_filter: row.get::<String>(3).unwrap_or_default(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: &NewEmail) -> Result<InsertOutcome, DatabaseError> {
        let conn = self.conn();
        let result = conn
            .execute(
                "INSERT INTO emails (message_id, from_address, to_address, subject, text_body, html_body, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    email.message_id.as_str(),
                    email.from_address.as_str(),
                    email.to_address.as_str(),
                    opt_text(email.subject.as_deref()),
                    opt_text(email.text_body.as_deref()),
                    opt_text(email.html_body.as_deref()),
                    email.received_at.to_rfc3339(),
                ],
            )
            .await;

        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                debug!(id, message_id = %email.message_id, "Email inserted");
                Ok(InsertOutcome {
                    inserted: true,
                    id: Some(id),
                })
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(message_id = %email.message_id, "Duplicate message_id, insert skipped");
                Ok(InsertOutcome {
                    inserted: false,
                    id: None,
                })
            }
            Err(e) => Err(DatabaseError::Query(format!("insert_email: {e}"))),
        }
    }

    async fn emails_for_address(
        &self,
        local_part: &str,
        domains: &[String],
        excluded_sender: &str,
    ) -> Result<Vec<EmailRecord>, DatabaseError> {
        // Unaddressed mail (empty/NULL to_address) is visible to every
        // inbox so unresolved messages are never silently lost.
        let mut clauses = vec!["to_address = ''".to_string(), "to_address IS NULL".to_string()];
        let mut values: Vec<Value> = Vec::new();

        for domain in domains {
            values.push(Value::Text(format!("%{local_part}@{domain}%")));
            clauses.push(format!("to_address LIKE ?{}", values.len()));
        }

        let mut sql = format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE ({})",
            clauses.join(" OR ")
        );
        if !excluded_sender.is_empty() {
            values.push(Value::Text(format!("%{excluded_sender}%")));
            sql.push_str(&format!(" AND from_address NOT LIKE ?{}", values.len()));
        }
        sql.push_str(" ORDER BY received_at DESC");

        let mut rows = self
            .conn()
            .query(&sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("emails_for_address: {e}")))?;

        let mut emails = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("emails_for_address row: {e}")))?
        {
            let email = row_to_email(&row)
                .map_err(|e| DatabaseError::Query(format!("emails_for_address map: {e}")))?;
            emails.push(email);
        }
        Ok(emails)
    }

    async fn delete_older_than(&self, age: chrono::Duration) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - age;
        let count = self
            .conn()
            .execute(
                "DELETE FROM emails WHERE datetime(received_at) < datetime(?1)",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_older_than: {e}")))?;
        Ok(count)
    }

    // ── Services ────────────────────────────────────────────────────

    async fn list_services(&self) -> Result<Vec<ServiceRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, sender_filter, subject_filter FROM services ORDER BY id",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_services: {e}")))?;

        let mut services = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_services row: {e}")))?
        {
            let service = row_to_service(&row)
                .map_err(|e| DatabaseError::Query(format!("list_services map: {e}")))?;
            services.push(service);
        }
        Ok(services)
    }

    async fn get_service(&self, id: i64) -> Result<Option<ServiceRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, sender_filter, subject_filter FROM services WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_service: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_service row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_service(&row).map_err(|e| {
                DatabaseError::Query(format!("get_service map: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn get_service_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ServiceRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, sender_filter, subject_filter FROM services WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_service_by_name: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_service_by_name row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_service(&row).map_err(|e| {
                DatabaseError::Query(format!("get_service_by_name map: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn create_service(
        &self,
        name: &str,
        sender_filter: &str,
        subject_filter: &str,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO services (name, sender_filter, subject_filter) VALUES (?1, ?2, ?3)",
            params![name, sender_filter, subject_filter],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_service: {e}")))?;

        let id = conn.last_insert_rowid();
        info!(id, name, "Service created");
        Ok(id)
    }

    async fn update_service(
        &self,
        id: i64,
        sender_filter: &str,
        subject_filter: &str,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE services SET sender_filter = ?1, subject_filter = ?2 WHERE id = ?3",
                params![sender_filter, subject_filter, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_service: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "service".into(),
                id: id.to_string(),
            });
        }
        debug!(id, "Service filters updated");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_email(message_id: &str, from: &str, to: &str, received_at: DateTime<Utc>) -> NewEmail {
        NewEmail {
            message_id: message_id.into(),
            from_address: from.into(),
            to_address: to.into(),
            subject: Some("Test subject".into()),
            text_body: Some("body".into()),
            html_body: None,
            received_at,
        }
    }

    #[tokio::test]
    async fn local_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsink.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_email(&make_email("m1", "a@x.com", "alice@tmp.test", Utc::now()))
                .await
                .unwrap();
        }

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        let emails = reopened
            .emails_for_address("alice", &["tmp.test".into()], "")
            .await
            .unwrap();
        assert_eq!(emails.len(), 1);
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let db = test_db().await;
        let first = db
            .insert_email(&make_email("m1", "a@x.com", "alice@tmp.test", Utc::now()))
            .await
            .unwrap();
        let second = db
            .insert_email(&make_email("m2", "b@x.com", "alice@tmp.test", Utc::now()))
            .await
            .unwrap();

        assert!(first.inserted);
        assert!(second.inserted);
        assert!(second.id.unwrap() > first.id.unwrap());
    }

    #[tokio::test]
    async fn duplicate_message_id_is_swallowed() {
        let db = test_db().await;
        let first = db
            .insert_email(&make_email("dup", "a@x.com", "alice@tmp.test", Utc::now()))
            .await
            .unwrap();
        let second = db
            .insert_email(&make_email("dup", "b@y.com", "bob@tmp.test", Utc::now()))
            .await
            .unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert!(second.id.is_none());

        // Exactly one row survives, the first one.
        let emails = db
            .emails_for_address("alice", &["tmp.test".into()], "")
            .await
            .unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].from_address, "a@x.com");
    }

    #[tokio::test]
    async fn emails_for_address_scopes_and_orders() {
        let db = test_db().await;
        let now = Utc::now();
        db.insert_email(&make_email("m1", "a@x.com", "alice@tmp.test", now - chrono::Duration::hours(2)))
            .await
            .unwrap();
        db.insert_email(&make_email("m2", "b@x.com", "alice@alt.test", now))
            .await
            .unwrap();
        db.insert_email(&make_email("m3", "c@x.com", "bob@tmp.test", now - chrono::Duration::hours(1)))
            .await
            .unwrap();

        let domains = vec!["tmp.test".to_string(), "alt.test".to_string()];
        let emails = db.emails_for_address("alice", &domains, "").await.unwrap();

        // bob's mail is excluded; newest first.
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].message_id, "m2");
        assert_eq!(emails[1].message_id, "m1");
    }

    #[tokio::test]
    async fn unaddressed_mail_visible_to_every_inbox() {
        let db = test_db().await;
        db.insert_email(&make_email("m1", "a@x.com", "", Utc::now()))
            .await
            .unwrap();

        let emails = db
            .emails_for_address("alice", &["tmp.test".into()], "")
            .await
            .unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].to_address, "");
    }

    #[tokio::test]
    async fn excluded_sender_is_filtered() {
        let db = test_db().await;
        db.insert_email(&make_email("m1", "relay@sink.test", "alice@tmp.test", Utc::now()))
            .await
            .unwrap();
        db.insert_email(&make_email("m2", "a@x.com", "alice@tmp.test", Utc::now()))
            .await
            .unwrap();

        let emails = db
            .emails_for_address("alice", &["tmp.test".into()], "relay@sink.test")
            .await
            .unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].message_id, "m2");
    }

    #[tokio::test]
    async fn comma_joined_recipient_list_still_matches() {
        let db = test_db().await;
        db.insert_email(&make_email(
            "m1",
            "a@x.com",
            "alice@tmp.test, carol@tmp.test",
            Utc::now(),
        ))
        .await
        .unwrap();

        let emails = db
            .emails_for_address("carol", &["tmp.test".into()], "")
            .await
            .unwrap();
        assert_eq!(emails.len(), 1);
    }

    #[tokio::test]
    async fn delete_older_than_respects_boundary() {
        let db = test_db().await;
        let now = Utc::now();
        db.insert_email(&make_email("m1", "a@x.com", "alice@tmp.test", now))
            .await
            .unwrap();
        db.insert_email(&make_email(
            "m2",
            "a@x.com",
            "alice@tmp.test",
            now - chrono::Duration::hours(23),
        ))
        .await
        .unwrap();
        db.insert_email(&make_email(
            "m3",
            "a@x.com",
            "alice@tmp.test",
            now - chrono::Duration::hours(25),
        ))
        .await
        .unwrap();

        let deleted = db
            .delete_older_than(chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = db
            .emails_for_address("alice", &["tmp.test".into()], "")
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|e| e.message_id != "m3"));
    }

    #[tokio::test]
    async fn well_known_services_are_seeded() {
        let db = test_db().await;
        let services = db.list_services().await.unwrap();
        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Zoom"));
        assert!(names.contains(&"Netflix"));

        let netflix = db.get_service_by_name("Netflix").await.unwrap().unwrap();
        assert_eq!(netflix.sender_filter, "netflix.com");
        assert!(netflix.subject_filter.contains('|'));
    }

    #[tokio::test]
    async fn create_and_update_service() {
        let db = test_db().await;
        let id = db
            .create_service("Disney", "disneyplus.com", "Your one-time passcode")
            .await
            .unwrap();

        let loaded = db.get_service(id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Disney");
        assert_eq!(loaded.sender_filter, "disneyplus.com");

        db.update_service(id, "disney.com", "New code|Old code")
            .await
            .unwrap();
        let updated = db.get_service(id).await.unwrap().unwrap();
        assert_eq!(updated.sender_filter, "disney.com");
        assert_eq!(updated.subject_filter, "New code|Old code");
    }

    #[tokio::test]
    async fn update_unknown_service_is_not_found() {
        let db = test_db().await;
        let err = db.update_service(9999, "x", "y").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
