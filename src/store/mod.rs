//! Persistence layer — libSQL-backed storage for emails and routing services.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, EmailRecord, InsertOutcome, NewEmail, ServiceRecord};
