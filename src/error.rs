//! Crate-level error types.
//!
//! Errors are grouped by where they become fatal: configuration errors kill
//! a single target, transport and upgrade errors kill a connection, and
//! HTTP/2 errors carry their own taxonomy in [`crate::h2::Error`].

use thiserror::Error;

/// Errors produced while probing a target.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The target URL could not be parsed.
    #[error("invalid target `{url}`: {reason}")]
    Config { url: String, reason: String },

    /// The target URL has a scheme other than http or https.
    #[error("unexpected scheme for connection: {0}")]
    UnexpectedScheme(String),

    /// DNS resolution failed on both the recursive and the system resolver.
    #[error("dns lookup for {host} failed: {reason}")]
    Dns { host: String, reason: String },

    /// TCP dial failure or read/write on a dead socket.
    #[error("connection failed: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS handshake failure.
    #[error("tls handshake failed: {0}")]
    Tls(String),

    /// The frontend closed the socket mid-handshake. The only retryable
    /// failure class: a fresh dial sometimes lands on a healthier backend.
    #[error("unexpected end of stream during upgrade")]
    UnexpectedEof,

    /// The frontend answered the upgrade request with something other
    /// than 101. Not proof of invulnerability, just of a refused handshake.
    #[error("upgrade refused with status {status}")]
    UpgradeRefused { status: u16 },

    /// A 101 response that does not carry `Upgrade: h2c`.
    #[error("101 response is missing `Upgrade: h2c`")]
    UpgradeNotH2c,

    /// Malformed HTTP/1.1 on the upgrade or control leg.
    #[error("http/1.1 parse error: {0}")]
    Http1(#[from] crate::http1::ParseError),

    /// HTTP/2 protocol, stream or shutdown error after the upgrade.
    #[error(transparent)]
    H2(#[from] crate::h2::Error),
}

impl ProbeError {
    /// Whether a fresh connection attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProbeError::UnexpectedEof => true,
            ProbeError::Transport(err) => err.kind() == std::io::ErrorKind::UnexpectedEof,
            ProbeError::H2(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProbeError::UnexpectedEof.is_retryable());
        assert!(!ProbeError::UpgradeRefused { status: 400 }.is_retryable());
        assert!(!ProbeError::UnexpectedScheme("ftp".into()).is_retryable());

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(ProbeError::Transport(eof).is_retryable());
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no");
        assert!(!ProbeError::Transport(refused).is_retryable());

        // A peer GOAWAY is worth a fresh connection; a protocol error is not.
        assert!(ProbeError::H2(crate::h2::Error::GoneAway {
            stream_id: 5,
            last_stream_id: 1
        })
        .is_retryable());
        assert!(!ProbeError::H2(crate::h2::Error::Protocol("bad".into())).is_retryable());
    }
}
