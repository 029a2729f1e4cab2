//! HTTP/2 error taxonomy and RFC 7540 Section 7 error codes.

use std::fmt;

use thiserror::Error;

/// HTTP/2 connection and stream errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame or state-machine violation. Connection-fatal.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// HPACK decode failure. Connection-fatal.
    #[error("compression error: {0}")]
    Compression(String),

    #[error("frame size error: {0}")]
    FrameSize(String),

    #[error("flow control error: {0}")]
    FlowControl(String),

    /// The peer reset one stream; only that probe fails.
    #[error("stream {stream_id} reset by peer: {code}")]
    StreamReset { stream_id: u32, code: ErrorCode },

    /// GOAWAY received; streams above `last_stream_id` were not processed.
    /// Retryable on a fresh connection.
    #[error("connection is going away, stream {stream_id} > last processed {last_stream_id}")]
    GoneAway { stream_id: u32, last_stream_id: u32 },

    /// The caller abandoned the request; RST_STREAM CANCEL was sent.
    #[error("request cancelled on stream {0}")]
    Cancelled(u32),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl Error {
    /// Whether the request may be replayed on a new connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::GoneAway { .. })
    }
}

/// RFC 7540 Section 7 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decode a wire value. Unknown codes are treated as INTERNAL_ERROR.
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            _ => ErrorCode::InternalError,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trip() {
        assert_eq!(ErrorCode::from_u32(0x0), ErrorCode::NoError);
        assert_eq!(ErrorCode::from_u32(0x8), ErrorCode::Cancel);
        assert_eq!(ErrorCode::from_u32(0xd), ErrorCode::Http11Required);
        assert_eq!(ErrorCode::from_u32(0xdeadbeef), ErrorCode::InternalError);
    }

    #[test]
    fn display_includes_name_and_code() {
        assert_eq!(ErrorCode::Cancel.to_string(), "CANCEL (0x8)");
        let err = Error::StreamReset {
            stream_id: 5,
            code: ErrorCode::RefusedStream,
        };
        assert!(err.to_string().contains("REFUSED_STREAM"));
    }

    #[test]
    fn only_goaway_is_retryable() {
        assert!(Error::GoneAway {
            stream_id: 9,
            last_stream_id: 3
        }
        .is_retryable());
        assert!(!Error::Protocol("x".into()).is_retryable());
        assert!(!Error::Cancelled(3).is_retryable());
    }
}
