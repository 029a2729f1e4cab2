//! HTTP/2 frame model (RFC 7540 Section 6).

use bytes::Bytes;

use super::error::ErrorCode;
use super::settings::Settings;

/// Wire frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    Goaway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

/// Frame flag bits. Which bits mean what depends on the frame type.
pub mod flags {
    /// END_STREAM on DATA and HEADERS; ACK on SETTINGS and PING.
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// A decoded HTTP/2 frame. Payload padding and priority fields are already
/// stripped; only the semantic content remains.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Settings,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    Goaway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    /// PRIORITY and extension frames: carried through so the connection can
    /// ignore them knowingly.
    Unknown { frame_type: u8, stream_id: u32 },
}

impl Frame {
    /// The stream this frame belongs to; 0 for connection-level frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::Goaway { .. } => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::PushPromise { .. } => "PUSH_PROMISE",
            Frame::Ping { .. } => "PING",
            Frame::Goaway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_round_trip() {
        for byte in 0u8..=9 {
            let ft = FrameType::from_u8(byte).unwrap();
            assert_eq!(ft.as_u8(), byte);
        }
        assert_eq!(FrameType::from_u8(0x42), None);
    }

    #[test]
    fn stream_ids() {
        let headers = Frame::Headers {
            stream_id: 3,
            block: Bytes::new(),
            end_stream: true,
            end_headers: true,
        };
        assert_eq!(headers.stream_id(), 3);
        assert_eq!(
            Frame::Ping {
                ack: false,
                data: [0; 8]
            }
            .stream_id(),
            0
        );
    }
}
