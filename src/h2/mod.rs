//! HTTP/2 client wire layer: frame codec, HPACK, stream state, connection.
//!
//! This is a deliberately partial HTTP/2 implementation. It covers exactly
//! what driving smuggled and control requests needs: the client handshake,
//! HEADERS/DATA/CONTINUATION, SETTINGS exchange, PING, WINDOW_UPDATE,
//! RST_STREAM and GOAWAY. PRIORITY is parsed and ignored; server push is
//! refused per stream.

pub mod codec;
pub mod conn;
pub mod error;
pub mod frame;
pub mod hpack;
pub mod huffman;
pub mod settings;
pub mod stream;

pub use conn::ClientConn;
pub use error::{Error, ErrorCode};
pub use frame::{Frame, FrameType};
pub use settings::Settings;

/// Client connection preface, sent first on every switched or direct
/// connection (RFC 7540 Section 3.5).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Stream 0 carries connection-level frames only.
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Default flow-control window (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: u32 = 65_535;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Default HPACK dynamic table size.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

/// Cap on an accumulated header block (HEADERS + CONTINUATION) per stream.
/// A malicious peer gets the connection torn down instead of our memory.
pub const MAX_HEADER_BLOCK: usize = 64 * 1024;
