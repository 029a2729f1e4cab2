//! The smuggled connection: dial, upgrade, switch protocols.

use std::time::Duration;

use crate::error::ProbeError;
use crate::h2::ClientConn;
use crate::http1::HeadParser;
use crate::message::{Request, Response};
use crate::session::{dial, NetSession};
use crate::tls::TlsClientConfig;

use super::upgrade::{serialize_upgrade_request, UpgradeOptions};

/// Connection knobs shared by the smuggled and control paths.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Bound on TCP connect (and the DNS lookup preceding it).
    pub dial_timeout: Duration,
    /// Per-request read deadline. `None` waits as long as the server does.
    pub request_timeout: Option<Duration>,
    /// Extra upgrade attempts after a mid-handshake EOF.
    pub max_retries: usize,
    /// Verify TLS certificates. Off by default; the targets are usually the
    /// kind of infrastructure where verification would only get in the way.
    pub verify_tls: bool,
}

impl Default for ConnConfig {
    fn default() -> Self {
        ConnConfig {
            dial_timeout: Duration::from_secs(5),
            request_timeout: None,
            max_retries: 0,
            verify_tls: false,
        }
    }
}

/// A connection that has completed the h2c upgrade. It cannot exist in any
/// other state: `connect` either returns an open connection with the server
/// preface already processed, or an error.
pub struct SmuggledConn {
    conn: ClientConn,
}

impl std::fmt::Debug for SmuggledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmuggledConn").finish_non_exhaustive()
    }
}

impl SmuggledConn {
    /// Dial the target of `request`, perform the upgrade handshake with
    /// `request` as the HTTP/1.1 upgrade request, and switch to HTTP/2.
    ///
    /// Only an unexpected EOF during the handshake is retried, on a fresh
    /// socket each time, `config.max_retries` times. Every other failure is
    /// final: the second attempt would just hit the same refusal.
    pub fn connect(
        request: &Request,
        opts: &UpgradeOptions,
        config: &ConnConfig,
    ) -> Result<Self, ProbeError> {
        let attempts = config.max_retries + 1;
        let mut last_err = None;

        for attempt in 1..=attempts {
            tracing::trace!(attempt, attempts, target = %request.target, "upgrade attempt");
            match Self::connect_once(request, opts, config) {
                Ok(conn) => return Ok(conn),
                Err(err) if err.is_retryable() => {
                    tracing::trace!(target = %request.target, "unexpected EOF during upgrade");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.expect("at least one attempt"))
    }

    fn connect_once(
        request: &Request,
        opts: &UpgradeOptions,
        config: &ConnConfig,
    ) -> Result<Self, ProbeError> {
        // No ALPN here: the frontend must see a plain HTTP/1.1 client.
        let tls = TlsClientConfig::builder()
            .verify_peer(config.verify_tls)
            .build()?;
        let transport = dial(&request.target, config.dial_timeout, &tls)?;
        let mut session = NetSession::new(transport);
        session.set_timeout(config.request_timeout);

        let wire = serialize_upgrade_request(request, opts);
        tracing::trace!(bytes = wire.len(), "writing upgrade request");
        session.write_all(&wire)?;

        // Read exactly the 101 head; anything past the blank line is
        // already HTTP/2 and is seeded into the connection untouched.
        let mut parser = HeadParser::new();
        let (head, leftover) = loop {
            let mut chunk = [0u8; 2048];
            let n = session.read(&mut chunk).map_err(|err| {
                if err.kind() == std::io::ErrorKind::UnexpectedEof
                    || err.kind() == std::io::ErrorKind::ConnectionReset
                {
                    ProbeError::UnexpectedEof
                } else {
                    ProbeError::Transport(err)
                }
            })?;
            if n == 0 {
                return Err(ProbeError::UnexpectedEof);
            }
            if let Some(done) = parser.feed(&chunk[..n])? {
                break done;
            }
        };

        if head.status != 101 {
            tracing::debug!(status = head.status, target = %request.target, "upgrade refused");
            return Err(ProbeError::UpgradeRefused {
                status: head.status,
            });
        }
        let upgraded_to_h2c = head
            .headers
            .get("Upgrade")
            .map(|v| v.eq_ignore_ascii_case("h2c"))
            .unwrap_or(false);
        if !upgraded_to_h2c {
            return Err(ProbeError::UpgradeNotH2c);
        }

        tracing::debug!(target = %request.target, "connection upgraded to h2c");
        // The switch is still part of the handshake: a socket that dies
        // before the server preface lands is the same retryable EOF as one
        // that dies before the 101.
        let conn = ClientConn::after_upgrade(session, leftover).map_err(|err| match err {
            crate::h2::Error::ConnectionClosed => ProbeError::UnexpectedEof,
            crate::h2::Error::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                ProbeError::UnexpectedEof
            }
            other => ProbeError::H2(other),
        })?;
        Ok(SmuggledConn { conn })
    }

    /// The server's response to the upgrade request itself, delivered as
    /// HTTP/2 frames on stream 1.
    pub fn upgrade_response(&mut self) -> Result<Response, ProbeError> {
        Ok(self.conn.await_stream(1)?)
    }

    /// Send one smuggled probe and wait for its response.
    pub fn round_trip(&mut self, request: &Request) -> Result<Response, ProbeError> {
        Ok(self.conn.round_trip(request)?)
    }

    pub fn close(self) {
        self.conn.close();
    }
}
