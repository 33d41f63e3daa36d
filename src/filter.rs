//! Filter engine — pure routing-scope matching over stored emails.
//!
//! Routing is computed at query time, never baked into storage. Matching is
//! case-sensitive substring containment, not tokenized or normalized; that is
//! a deliberate compatibility constraint, kept as-is rather than "fixed".

use crate::store::{EmailRecord, ServiceRecord};

/// A service's filters with the `|`-delimited subject alternation parsed
/// once, so match calls don't re-split the stored string.
#[derive(Debug, Clone)]
pub struct ServiceFilter {
    pub name: String,
    sender_filter: String,
    subject_alternatives: Vec<String>,
}

impl ServiceFilter {
    /// Parse a registry record into a matchable filter.
    pub fn from_record(record: &ServiceRecord) -> Self {
        let subject_alternatives = record
            .subject_filter
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Self {
            name: record.name.clone(),
            sender_filter: record.sender_filter.clone(),
            subject_alternatives,
        }
    }

    /// True if the email matches any subject alternative OR the sender
    /// substring. A service with neither filter matches nothing.
    pub fn matches(&self, email: &EmailRecord) -> bool {
        let subject_hit = email.subject.as_deref().is_some_and(|subject| {
            self.subject_alternatives
                .iter()
                .any(|alt| subject.contains(alt.as_str()))
        });

        let sender_hit =
            !self.sender_filter.is_empty() && email.from_address.contains(&self.sender_filter);

        subject_hit || sender_hit
    }
}

/// A routing scope an inbox view can be narrowed to.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Every message for the inbox; named-service mail is NOT excluded here.
    All,
    /// Messages matching one named service's filters.
    Service(ServiceFilter),
    /// Messages matching no known service's sender substring. Defined by
    /// sender exclusion only — a message eligible for a named service by
    /// subject alone but from an unrelated sender still lands here.
    CatchAll { sender_filters: Vec<String> },
}

impl Scope {
    /// Build the catch-all scope from the full service registry.
    pub fn catch_all(services: &[ServiceRecord]) -> Self {
        let sender_filters = services
            .iter()
            .filter(|s| !s.sender_filter.is_empty())
            .map(|s| s.sender_filter.clone())
            .collect();
        Self::CatchAll { sender_filters }
    }

    /// Decide whether a stored email belongs to this scope.
    pub fn includes(&self, email: &EmailRecord) -> bool {
        match self {
            Scope::All => true,
            Scope::Service(filter) => filter.matches(email),
            Scope::CatchAll { sender_filters } => !sender_filters
                .iter()
                .any(|sender| email.from_address.contains(sender.as_str())),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
