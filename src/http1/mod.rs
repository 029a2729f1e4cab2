//! HTTP/1.1 support for the upgrade leg and the plaintext control path.
//!
//! Only the client half lives here: serializing requests, parsing response
//! heads without over-reading into the post-upgrade byte stream, and
//! decoding chunked bodies on control responses.

pub mod chunked;
pub mod headers;
pub mod parser;

pub use headers::Headers;
pub use parser::{HeadParser, ResponseHead};

use thiserror::Error;

/// CRLF line ending.
pub const CRLF: &str = "\r\n";

/// Maximum number of headers accepted per message.
pub const MAX_HEADERS: usize = 64;

/// Maximum bytes of response head buffered before giving up.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// HTTP/1.1 parse errors.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed status line: {0}")]
    StatusLine(String),

    #[error("invalid status code: {0}")]
    StatusCode(String),

    #[error("invalid header line: {0}")]
    Header(String),

    #[error("invalid Content-Length: {0}")]
    ContentLength(String),

    #[error("invalid chunk size: {0}")]
    ChunkSize(String),

    #[error("response head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,
}
