//! Destination-address resolution from forwarding headers.
//!
//! Upstream delivery funnels all disposable-domain mail through one physical
//! mailbox via forwarding, so the original per-user address survives only in
//! forwarding metadata. The probe walks those headers in priority order and
//! validates the domain against the served allow-list before accepting.

use mail_parser::{HeaderValue, Message};
use regex::Regex;
use tracing::debug;

/// Forwarding-indicator headers, in priority order.
const FORWARDING_HEADERS: &[&str] = &["X-Original-To", "Delivered-To", "X-Forwarded-To"];

/// Resolves the disposable-inbox address a message was actually sent to.
pub struct AddressResolver {
    served_domains: Vec<String>,
    email_token: Regex,
}

impl AddressResolver {
    /// Create a resolver for the given served-domain allow-list.
    pub fn new(served_domains: Vec<String>) -> Self {
        Self {
            served_domains,
            email_token: Regex::new(r"[A-Za-z0-9._-]+@[A-Za-z0-9._-]+\.[A-Za-z0-9_-]+").unwrap(),
        }
    }

    /// Resolve the destination address, first match wins:
    /// forwarding headers (domain-validated) → standard To field → empty.
    ///
    /// An empty result means the message is unaddressed; it is still stored
    /// and becomes visible to every inbox.
    pub fn resolve(&self, message: &Message<'_>) -> String {
        for header in FORWARDING_HEADERS {
            let Some(value) = header_text(message, header) else {
                continue;
            };
            let Some(token) = self.email_token.find(&value) else {
                continue;
            };
            if self.is_served(token.as_str()) {
                debug!(header, address = token.as_str(), "Resolved destination from forwarding header");
                return token.as_str().to_string();
            }
        }

        to_addresses(message).join(", ")
    }

    /// True if the address's domain is one this installation serves.
    fn is_served(&self, address: &str) -> bool {
        let Some((_, domain)) = address.rsplit_once('@') else {
            return false;
        };
        self.served_domains
            .iter()
            .any(|served| served.eq_ignore_ascii_case(domain))
    }
}

/// Case-insensitive header lookup returning the first textual value.
fn header_text(message: &Message<'_>, name: &str) -> Option<String> {
    let header = message
        .headers()
        .iter()
        .find(|h| h.name.as_str().eq_ignore_ascii_case(name))?;

    match &header.value {
        HeaderValue::Text(text) => Some(text.to_string()),
        HeaderValue::TextList(list) => list.first().map(|t| t.to_string()),
        HeaderValue::Address(addr) => addr
            .first()
            .and_then(|a| a.address.as_ref())
            .map(|a| a.to_string()),
        _ => None,
    }
}

/// All recipient addresses from the standard To field.
fn to_addresses(message: &Message<'_>) -> Vec<String> {
    let Some(addr) = message.to() else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mail_parser::MessageParser;

    fn resolver() -> AddressResolver {
        AddressResolver::new(vec!["tmp.test".into(), "alt.test".into()])
    }

    fn resolve_raw(raw: &str) -> String {
        let parser = MessageParser::default();
        let message = parser
            .parse(raw.as_bytes())
            .expect("test message should parse");
        resolver().resolve(&message)
    }

    #[test]
    fn forwarding_header_wins_over_to() {
        let raw = "X-Original-To: alice@tmp.test\r\n\
                   From: Bob <bob@x.com>\r\n\
                   To: shared@relay.example\r\n\
                   Subject: hi\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "alice@tmp.test");
    }

    #[test]
    fn foreign_domain_falls_through_to_to_header() {
        let raw = "X-Original-To: alice@other.example\r\n\
                   From: Bob <bob@x.com>\r\n\
                   To: fallback@relay.example\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "fallback@relay.example");
    }

    #[test]
    fn later_forwarding_header_used_when_earlier_rejected() {
        let raw = "X-Original-To: alice@other.example\r\n\
                   Delivered-To: carol@tmp.test\r\n\
                   To: shared@relay.example\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "carol@tmp.test");
    }

    #[test]
    fn delivered_to_probed_when_original_to_absent() {
        let raw = "Delivered-To: dave@alt.test\r\n\
                   To: shared@relay.example\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "dave@alt.test");
    }

    #[test]
    fn x_forwarded_to_is_last_probe() {
        let raw = "X-Forwarded-To: erin@tmp.test\r\n\
                   To: shared@relay.example\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "erin@tmp.test");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let raw = "x-original-to: alice@tmp.test\r\n\
                   To: shared@relay.example\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "alice@tmp.test");
    }

    #[test]
    fn multiple_recipients_joined_with_comma_space() {
        let raw = "From: Bob <bob@x.com>\r\n\
                   To: a@x.com, b@y.com\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "a@x.com, b@y.com");
    }

    #[test]
    fn nothing_resolvable_yields_empty_string() {
        let raw = "From: Bob <bob@x.com>\r\nSubject: hi\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "");
    }

    #[test]
    fn domain_comparison_ignores_case() {
        let raw = "X-Original-To: alice@TMP.TEST\r\n\
                   To: shared@relay.example\r\n\r\nbody";
        assert_eq!(resolve_raw(raw), "alice@TMP.TEST");
    }
}
