//! Blocking IMAP-over-TLS session.
//!
//! All methods perform blocking network I/O — run them inside
//! `tokio::task::spawn_blocking`, never from async code directly.

use std::io::{Read as _, Write as _};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ImapConfig;
use crate::error::ImapError;

/// Read timeout applied outside IDLE waits. A stalled read past this is
/// treated as a dead connection and funnels into the reconnect path.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// What ended an IDLE wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// Server announced new mail (untagged EXISTS).
    NewMail,
    /// Refresh window elapsed without news; re-issue IDLE.
    KeepAlive,
}

/// An authenticated IMAP session with INBOX selected.
pub struct ImapSession {
    tls: rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
    tag: u32,
    supports_idle: bool,
}

impl ImapSession {
    /// Connect, authenticate and select INBOX.
    pub fn connect(config: &ImapConfig) -> Result<Self, ImapError> {
        let connect_failed = |reason: String| ImapError::ConnectFailed {
            host: config.host.clone(),
            port: config.port,
            reason,
        };

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| connect_failed(e.to_string()))?
            .next()
            .ok_or_else(|| connect_failed("hostname resolved to no addresses".into()))?;

        let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)
            .map_err(|e| connect_failed(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'static> =
            rustls::pki_types::ServerName::try_from(config.host.clone())
                .map_err(|e| ImapError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| ImapError::Tls(e.to_string()))?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
            supports_idle: false,
        };

        let _greeting = session.read_line()?;

        let capability = session.send_command("CAPABILITY")?;
        session.supports_idle = capability
            .iter()
            .any(|line| line.starts_with("* CAPABILITY") && line.contains("IDLE"));

        let login = session.send_command(&format!(
            "LOGIN \"{}\" \"{}\"",
            config.username, config.password
        ))?;
        if !ok_completion(&login) {
            return Err(ImapError::AuthFailed {
                user: config.username.clone(),
            });
        }

        let select = session.send_command("SELECT \"INBOX\"")?;
        if !ok_completion(&select) {
            return Err(ImapError::Protocol("SELECT INBOX refused".into()));
        }

        debug!(idle = session.supports_idle, "IMAP session established");
        Ok(session)
    }

    /// Whether the server advertised the IDLE capability.
    pub fn supports_idle(&self) -> bool {
        self.supports_idle
    }

    /// Sequence numbers of messages received since the given instant.
    pub fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<u32>, ImapError> {
        let lines = self.send_command(&format!("SEARCH SINCE {}", imap_date(since)))?;
        if !ok_completion(&lines) {
            return Err(ImapError::Protocol("SEARCH refused".into()));
        }
        Ok(parse_search_ids(&lines))
    }

    /// Fetch one message's full RFC 822 body. Flags are left untouched —
    /// dedup on `message_id` absorbs refetches.
    pub fn fetch_rfc822(&mut self, seq: u32) -> Result<Vec<u8>, ImapError> {
        let lines = self.send_command(&format!("FETCH {seq} (RFC822)"))?;
        if !ok_completion(&lines) {
            return Err(ImapError::Protocol(format!("FETCH {seq} failed")));
        }
        // First line opens the literal; the last two are the closing paren
        // of the FETCH response and the tagged completion.
        let body: String = lines
            .iter()
            .skip(1)
            .take(lines.len().saturating_sub(3))
            .cloned()
            .collect();
        Ok(body.into_bytes())
    }

    /// Block inside IDLE until the server announces new mail, the refresh
    /// window elapses, or the connection drops.
    pub fn idle_wait(&mut self, refresh: Duration) -> Result<IdleOutcome, ImapError> {
        let tag = self.next_tag();
        self.write_raw(&format!("{tag} IDLE\r\n"))?;

        let continuation = self.read_line()?;
        if !continuation.starts_with('+') {
            return Err(ImapError::Protocol(format!(
                "IDLE refused: {}",
                continuation.trim_end()
            )));
        }

        self.tls.sock.set_read_timeout(Some(refresh))?;
        let outcome = loop {
            match self.read_line() {
                Ok(line) if line.contains("EXISTS") => break IdleOutcome::NewMail,
                Ok(line) if line.starts_with("* BYE") => {
                    let _ = self.tls.sock.set_read_timeout(Some(READ_TIMEOUT));
                    return Err(ImapError::Closed);
                }
                // EXPUNGE, RECENT and friends don't end the wait.
                Ok(_) => continue,
                Err(ImapError::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    break IdleOutcome::KeepAlive;
                }
                Err(e) => {
                    let _ = self.tls.sock.set_read_timeout(Some(READ_TIMEOUT));
                    return Err(e);
                }
            }
        };
        self.tls.sock.set_read_timeout(Some(READ_TIMEOUT))?;

        self.write_raw("DONE\r\n")?;
        self.read_until_tag(&tag)?;
        Ok(outcome)
    }

    /// Best-effort LOGOUT; consumes the session.
    pub fn logout(mut self) {
        let _ = self.send_command("LOGOUT");
    }

    // ── Wire helpers ────────────────────────────────────────────────

    fn next_tag(&mut self) -> String {
        self.tag += 1;
        format!("A{}", self.tag)
    }

    fn send_command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        let tag = self.next_tag();
        self.write_raw(&format!("{tag} {cmd}\r\n"))?;
        self.read_until_tag(&tag)
    }

    fn write_raw(&mut self, data: &str) -> Result<(), ImapError> {
        self.tls.write_all(data.as_bytes())?;
        self.tls.flush()?;
        Ok(())
    }

    fn read_until_tag(&mut self, tag: &str) -> Result<Vec<String>, ImapError> {
        let completion = format!("{tag} ");
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&completion);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err(ImapError::Closed),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// ── Response parsing helpers ────────────────────────────────────────

/// True if the tagged completion line reports OK.
fn ok_completion(lines: &[String]) -> bool {
    lines
        .last()
        .is_some_and(|line| line.split_whitespace().nth(1) == Some("OK"))
}

/// Collect sequence numbers out of untagged SEARCH responses.
fn parse_search_ids(lines: &[String]) -> Vec<u32> {
    let mut ids = Vec::new();
    for line in lines {
        if let Some(rest) = line.strip_prefix("* SEARCH") {
            ids.extend(rest.split_whitespace().filter_map(|t| t.parse::<u32>().ok()));
        }
    }
    ids
}

/// IMAP date-text for a SEARCH SINCE criterion (e.g. `07-Aug-2026`).
fn imap_date(at: DateTime<Utc>) -> String {
    at.format("%d-%b-%Y").to_string()
}

// ── Tests ───────────────────────────────────────────────────────────
