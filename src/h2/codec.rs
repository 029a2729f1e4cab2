//! Frame encoding and decoding.
//!
//! Encoding writes into a caller-provided `BytesMut` so a whole batch of
//! frames lands on the socket in one write. Decoding is incremental: it
//! either pulls one complete frame off the front of the buffer or reports
//! that more bytes are needed.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{Error, ErrorCode};
use super::frame::{flags, Frame, FrameType};
use super::settings::Settings;

/// Fixed frame prefix: 24-bit length, 8-bit type, 8-bit flags,
/// 1 reserved bit + 31-bit stream id.
pub const FRAME_HEADER_LEN: usize = 9;

fn put_frame_header(
    buf: &mut BytesMut,
    frame_type: FrameType,
    frame_flags: u8,
    stream_id: u32,
    length: usize,
) {
    buf.put_u8((length >> 16) as u8);
    buf.put_u8((length >> 8) as u8);
    buf.put_u8(length as u8);
    buf.put_u8(frame_type.as_u8());
    buf.put_u8(frame_flags);
    buf.put_u32(stream_id & 0x7fff_ffff);
}

/// Encode one frame onto `buf`.
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) {
    match frame {
        Frame::Data {
            stream_id,
            data,
            end_stream,
        } => {
            let f = if *end_stream { flags::END_STREAM } else { 0 };
            put_frame_header(buf, FrameType::Data, f, *stream_id, data.len());
            buf.put_slice(data);
        }
        Frame::Headers {
            stream_id,
            block,
            end_stream,
            end_headers,
        } => {
            let mut f = 0;
            if *end_stream {
                f |= flags::END_STREAM;
            }
            if *end_headers {
                f |= flags::END_HEADERS;
            }
            put_frame_header(buf, FrameType::Headers, f, *stream_id, block.len());
            buf.put_slice(block);
        }
        Frame::RstStream {
            stream_id,
            error_code,
        } => {
            put_frame_header(buf, FrameType::RstStream, 0, *stream_id, 4);
            buf.put_u32(error_code.as_u32());
        }
        Frame::Settings { ack, settings } => {
            let payload = if *ack { Vec::new() } else { settings.to_payload() };
            let f = if *ack { flags::ACK } else { 0 };
            put_frame_header(buf, FrameType::Settings, f, 0, payload.len());
            buf.put_slice(&payload);
        }
        Frame::PushPromise {
            stream_id,
            promised_stream_id,
            block,
            end_headers,
        } => {
            let f = if *end_headers { flags::END_HEADERS } else { 0 };
            put_frame_header(buf, FrameType::PushPromise, f, *stream_id, 4 + block.len());
            buf.put_u32(promised_stream_id & 0x7fff_ffff);
            buf.put_slice(block);
        }
        Frame::Ping { ack, data } => {
            let f = if *ack { flags::ACK } else { 0 };
            put_frame_header(buf, FrameType::Ping, f, 0, 8);
            buf.put_slice(data);
        }
        Frame::Goaway {
            last_stream_id,
            error_code,
            debug_data,
        } => {
            put_frame_header(buf, FrameType::Goaway, 0, 0, 8 + debug_data.len());
            buf.put_u32(last_stream_id & 0x7fff_ffff);
            buf.put_u32(error_code.as_u32());
            buf.put_slice(debug_data);
        }
        Frame::WindowUpdate {
            stream_id,
            increment,
        } => {
            put_frame_header(buf, FrameType::WindowUpdate, 0, *stream_id, 4);
            buf.put_u32(increment & 0x7fff_ffff);
        }
        Frame::Continuation {
            stream_id,
            block,
            end_headers,
        } => {
            let f = if *end_headers { flags::END_HEADERS } else { 0 };
            put_frame_header(buf, FrameType::Continuation, f, *stream_id, block.len());
            buf.put_slice(block);
        }
        Frame::Unknown { .. } => {
            // Never encoded; decode-side artifact only.
        }
    }
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` for a complete frame, `Ok(None)`
/// when more bytes are needed.
pub fn decode_frame(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, Error> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let length = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
    let type_byte = buf[3];
    let frame_flags = buf[4];
    let stream_id =
        u32::from_be_bytes([buf[5] & 0x7f, buf[6], buf[7], buf[8]]);

    if length > max_frame_size as usize {
        return Err(Error::FrameSize(format!(
            "frame of {length} bytes exceeds maximum of {max_frame_size}"
        )));
    }
    if buf.len() < FRAME_HEADER_LEN + length {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + length];
    let consumed = FRAME_HEADER_LEN + length;

    let frame = match FrameType::from_u8(type_byte) {
        Some(FrameType::Data) => {
            let data = strip_padding(payload, frame_flags)?;
            Frame::Data {
                stream_id,
                data: Bytes::copy_from_slice(data),
                end_stream: frame_flags & flags::END_STREAM != 0,
            }
        }
        Some(FrameType::Headers) => {
            let mut block = strip_padding(payload, frame_flags)?;
            if frame_flags & flags::PRIORITY != 0 {
                if block.len() < 5 {
                    return Err(Error::FrameSize(
                        "HEADERS priority fields truncated".to_string(),
                    ));
                }
                block = &block[5..];
            }
            Frame::Headers {
                stream_id,
                block: Bytes::copy_from_slice(block),
                end_stream: frame_flags & flags::END_STREAM != 0,
                end_headers: frame_flags & flags::END_HEADERS != 0,
            }
        }
        Some(FrameType::RstStream) => {
            if payload.len() != 4 {
                return Err(Error::FrameSize(format!(
                    "RST_STREAM payload must be 4 bytes, got {}",
                    payload.len()
                )));
            }
            Frame::RstStream {
                stream_id,
                error_code: ErrorCode::from_u32(u32::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ])),
            }
        }
        Some(FrameType::Settings) => {
            if stream_id != 0 {
                return Err(Error::Protocol(
                    "SETTINGS frame on a non-zero stream".to_string(),
                ));
            }
            let ack = frame_flags & flags::ACK != 0;
            if ack && !payload.is_empty() {
                return Err(Error::FrameSize(
                    "SETTINGS ACK with a payload".to_string(),
                ));
            }
            Frame::Settings {
                ack,
                settings: if ack {
                    Settings::new()
                } else {
                    Settings::parse_payload(payload)?
                },
            }
        }
        Some(FrameType::PushPromise) => {
            let body = strip_padding(payload, frame_flags)?;
            if body.len() < 4 {
                return Err(Error::FrameSize(
                    "PUSH_PROMISE payload truncated".to_string(),
                ));
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id: u32::from_be_bytes([
                    body[0] & 0x7f,
                    body[1],
                    body[2],
                    body[3],
                ]),
                block: Bytes::copy_from_slice(&body[4..]),
                end_headers: frame_flags & flags::END_HEADERS != 0,
            }
        }
        Some(FrameType::Ping) => {
            if payload.len() != 8 {
                return Err(Error::FrameSize(format!(
                    "PING payload must be 8 bytes, got {}",
                    payload.len()
                )));
            }
            let mut data = [0u8; 8];
            data.copy_from_slice(payload);
            Frame::Ping {
                ack: frame_flags & flags::ACK != 0,
                data,
            }
        }
        Some(FrameType::Goaway) => {
            if payload.len() < 8 {
                return Err(Error::FrameSize(format!(
                    "GOAWAY payload must be at least 8 bytes, got {}",
                    payload.len()
                )));
            }
            Frame::Goaway {
                last_stream_id: u32::from_be_bytes([
                    payload[0] & 0x7f,
                    payload[1],
                    payload[2],
                    payload[3],
                ]),
                error_code: ErrorCode::from_u32(u32::from_be_bytes([
                    payload[4], payload[5], payload[6], payload[7],
                ])),
                debug_data: Bytes::copy_from_slice(&payload[8..]),
            }
        }
        Some(FrameType::WindowUpdate) => {
            if payload.len() != 4 {
                return Err(Error::FrameSize(format!(
                    "WINDOW_UPDATE payload must be 4 bytes, got {}",
                    payload.len()
                )));
            }
            Frame::WindowUpdate {
                stream_id,
                increment: u32::from_be_bytes([
                    payload[0] & 0x7f,
                    payload[1],
                    payload[2],
                    payload[3],
                ]),
            }
        }
        Some(FrameType::Continuation) => Frame::Continuation {
            stream_id,
            block: Bytes::copy_from_slice(payload),
            end_headers: frame_flags & flags::END_HEADERS != 0,
        },
        Some(FrameType::Priority) | None => Frame::Unknown {
            frame_type: type_byte,
            stream_id,
        },
    };

    Ok(Some((frame, consumed)))
}

fn strip_padding(payload: &[u8], frame_flags: u8) -> Result<&[u8], Error> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize("PADDED frame with empty payload".to_string()));
    }
    let pad_len = payload[0] as usize;
    let body = &payload[1..];
    if pad_len > body.len() {
        return Err(Error::Protocol(format!(
            "padding of {pad_len} bytes exceeds payload of {}",
            body.len()
        )));
    }
    Ok(&body[..body.len() - pad_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) {
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf);
        let (decoded, consumed) = decode_frame(&buf, 16_384).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trips_every_frame_kind() {
        round_trip(Frame::Data {
            stream_id: 3,
            data: Bytes::from_static(b"hello"),
            end_stream: true,
        });
        round_trip(Frame::Headers {
            stream_id: 5,
            block: Bytes::from_static(b"\x82\x87"),
            end_stream: false,
            end_headers: true,
        });
        round_trip(Frame::RstStream {
            stream_id: 7,
            error_code: ErrorCode::Cancel,
        });
        let mut settings = Settings::new();
        settings.max_concurrent_streams = Some(100);
        settings.initial_window_size = Some(1 << 30);
        round_trip(Frame::Settings {
            ack: false,
            settings,
        });
        round_trip(Frame::Settings {
            ack: true,
            settings: Settings::new(),
        });
        round_trip(Frame::Ping {
            ack: false,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        });
        round_trip(Frame::Goaway {
            last_stream_id: 5,
            error_code: ErrorCode::ProtocolError,
            debug_data: Bytes::from_static(b"bye"),
        });
        round_trip(Frame::WindowUpdate {
            stream_id: 0,
            increment: 65_535,
        });
        round_trip(Frame::Continuation {
            stream_id: 9,
            block: Bytes::from_static(b"\x01\x02"),
            end_headers: true,
        });
    }

    #[test]
    fn header_layout_is_exact() {
        let mut buf = BytesMut::new();
        encode_frame(
            &Frame::Data {
                stream_id: 1,
                data: Bytes::from_static(b"Hi"),
                end_stream: true,
            },
            &mut buf,
        );
        assert_eq!(&buf[..3], &[0, 0, 2]);
        assert_eq!(buf[3], 0x0);
        assert_eq!(buf[4], flags::END_STREAM);
        assert_eq!(&buf[5..9], &[0, 0, 0, 1]);
        assert_eq!(&buf[9..], b"Hi");
    }

    #[test]
    fn incremental_decode_waits_for_full_frame() {
        let mut buf = BytesMut::new();
        encode_frame(
            &Frame::Ping {
                ack: false,
                data: [9; 8],
            },
            &mut buf,
        );
        assert!(decode_frame(&buf[..4], 16_384).unwrap().is_none());
        assert!(decode_frame(&buf[..12], 16_384).unwrap().is_none());
        assert!(decode_frame(&buf, 16_384).unwrap().is_some());
    }

    #[test]
    fn oversized_frame_is_an_error() {
        // Claimed length 0x020000 with max 16384.
        let raw = [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert!(matches!(
            decode_frame(&raw, 16_384),
            Err(Error::FrameSize(_))
        ));
    }

    #[test]
    fn padded_data_is_stripped() {
        // DATA, PADDED, stream 1: pad_len 3, "ok", 3 pad bytes.
        let mut raw = vec![0x00, 0x00, 0x06, 0x00, flags::PADDED, 0x00, 0x00, 0x00, 0x01];
        raw.extend_from_slice(&[3, b'o', b'k', 0, 0, 0]);
        let (frame, _) = decode_frame(&raw, 16_384).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Data {
                stream_id: 1,
                data: Bytes::from_static(b"ok"),
                end_stream: false,
            }
        );
    }

    #[test]
    fn padding_overflow_is_an_error() {
        let mut raw = vec![0x00, 0x00, 0x03, 0x00, flags::PADDED, 0x00, 0x00, 0x00, 0x01];
        raw.extend_from_slice(&[9, b'o', b'k']);
        assert!(decode_frame(&raw, 16_384).is_err());
    }

    #[test]
    fn headers_priority_fields_are_skipped() {
        // HEADERS with PRIORITY flag: 5 priority bytes then the block.
        let block = b"\x82";
        let mut raw = vec![
            0x00,
            0x00,
            6,
            0x01,
            flags::PRIORITY | flags::END_HEADERS,
            0x00,
            0x00,
            0x00,
            0x03,
        ];
        raw.extend_from_slice(&[0x80, 0x00, 0x00, 0x01, 16]);
        raw.extend_from_slice(block);
        let (frame, _) = decode_frame(&raw, 16_384).unwrap().unwrap();
        match frame {
            Frame::Headers {
                stream_id, block, ..
            } => {
                assert_eq!(stream_id, 3);
                assert_eq!(&block[..], b"\x82");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn priority_frames_surface_as_unknown() {
        let raw = [
            0x00, 0x00, 0x05, 0x02, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x01, 0x10,
        ];
        let (frame, consumed) = decode_frame(&raw, 16_384).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(
            frame,
            Frame::Unknown {
                frame_type: 0x02,
                stream_id: 5
            }
        );
    }
}
