//! HTTP/2 client connection.
//!
//! One `ClientConn` owns one socket, its HPACK state and its stream table.
//! It is driven synchronously by a single owner: `round_trip` writes the
//! request frames and then reads until that stream completes, dispatching
//! interleaved frames for other streams to their builders along the way.
//! That keeps the socket at exactly one reader and one writer.

use bytes::{Buf, BytesMut};

use super::codec;
use super::error::{Error, ErrorCode};
use super::frame::Frame;
use super::hpack::{Decoder, Encoder, HeaderField};
use super::settings::Settings;
use super::stream::{StreamId, StreamMap};
use super::{CONNECTION_PREFACE, DEFAULT_HEADER_TABLE_SIZE, MAX_HEADER_BLOCK};
use crate::message::{Request, Response};
use crate::session::NetSession;
use crate::target::Scheme;

/// Replenish receive windows once this many bytes have been consumed.
const WINDOW_UPDATE_THRESHOLD: u32 = 32_768;

/// A header block in flight: HEADERS seen, END_HEADERS not yet.
struct PendingBlock {
    stream_id: StreamId,
    end_stream: bool,
    buf: Vec<u8>,
}

pub struct ClientConn {
    session: NetSession,
    /// Undecoded inbound bytes, seeded with whatever the upgrade leg
    /// over-read past the 101 head.
    recv: BytesMut,
    encoder: Encoder,
    decoder: Decoder,
    local: Settings,
    remote: Settings,
    streams: StreamMap,
    pending_block: Option<PendingBlock>,
    /// Last stream id from a peer GOAWAY; no new streams after this.
    goaway: Option<StreamId>,
    remote_settings_seen: bool,
    conn_send_window: i64,
    conn_recv_consumed: u32,
    closed: bool,
}

impl ClientConn {
    /// Direct HTTP/2 connection: preface, SETTINGS exchange, streams from 1.
    /// Used by the control transport after ALPN selected h2.
    pub fn handshake(session: NetSession) -> Result<Self, Error> {
        let mut conn = Self::new(session, BytesMut::new(), 1);
        conn.send_preface()?;
        conn.await_remote_settings()?;
        Ok(conn)
    }

    /// Connection taking over a socket right after a `101 Switching
    /// Protocols`. Stream 1 already belongs to the upgrade request, so
    /// client streams start at 3. `leftover` holds bytes the upgrade leg
    /// read past the response head.
    pub fn after_upgrade(session: NetSession, leftover: Vec<u8>) -> Result<Self, Error> {
        let mut recv = BytesMut::new();
        recv.extend_from_slice(&leftover);
        let mut conn = Self::new(session, recv, 3);
        conn.streams
            .register_upgrade_stream(conn.remote.initial_window_size() as i64);
        conn.send_preface()?;
        conn.await_remote_settings()?;
        Ok(conn)
    }

    fn new(session: NetSession, recv: BytesMut, first_stream_id: StreamId) -> Self {
        let local = Settings::new();
        ClientConn {
            session,
            recv,
            encoder: Encoder::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            decoder: Decoder::new(local.header_table_size() as usize),
            remote: Settings::new(),
            streams: StreamMap::new(first_stream_id),
            pending_block: None,
            goaway: None,
            remote_settings_seen: false,
            conn_send_window: local.initial_window_size() as i64,
            conn_recv_consumed: 0,
            local,
            closed: false,
        }
    }

    /// Send the 24-octet magic plus an empty SETTINGS frame, in one write.
    fn send_preface(&mut self) -> Result<(), Error> {
        let mut buf = BytesMut::with_capacity(CONNECTION_PREFACE.len() + 9);
        buf.extend_from_slice(CONNECTION_PREFACE);
        codec::encode_frame(
            &Frame::Settings {
                ack: false,
                settings: Settings::new(),
            },
            &mut buf,
        );
        self.session.write_all(&buf)?;
        Ok(())
    }

    /// Block until the server preface (its SETTINGS frame) is in. Frames
    /// for stream 1 arriving early are dispatched normally.
    fn await_remote_settings(&mut self) -> Result<(), Error> {
        while !self.remote_settings_seen {
            let frame = self.read_frame()?;
            self.dispatch(frame)?;
        }
        Ok(())
    }

    /// Send one request and block until its stream reaches a terminal state.
    pub fn round_trip(&mut self, request: &Request) -> Result<Response, Error> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if let Some(last) = self.goaway {
            return Err(Error::GoneAway {
                stream_id: self.streams.peek_next(),
                last_stream_id: last,
            });
        }

        let end_stream = request.body.is_empty();
        let stream_id = self
            .streams
            .allocate(end_stream, self.remote.initial_window_size() as i64);
        tracing::trace!(stream_id, target = %request.target, "sending request");

        let mut block = Vec::new();
        self.encoder.encode(&request_fields(request), &mut block);

        let mut out = BytesMut::new();
        self.write_header_block(&mut out, stream_id, &block, end_stream)?;
        if !end_stream {
            self.queue_data(&mut out, stream_id, &request.body)?;
        }
        self.session.write_all(&out)?;

        self.await_stream(stream_id)
    }

    /// Wait for `stream_id` to finish and build its response. Public for the
    /// upgrade-request stream, which is written by the HTTP/1.1 leg.
    pub fn await_stream(&mut self, stream_id: StreamId) -> Result<Response, Error> {
        loop {
            let Some(stream) = self.streams.get(stream_id) else {
                return Err(Error::Protocol(format!("stream {stream_id} vanished")));
            };

            if let Some(code) = stream.reset {
                self.streams.remove(stream_id);
                return Err(Error::StreamReset { stream_id, code });
            }
            if stream.response.is_complete() {
                let stream = self.streams.remove(stream_id).expect("stream exists");
                return stream.response.finish();
            }
            if let Some(last) = self.goaway {
                if stream_id > last {
                    self.streams.remove(stream_id);
                    return Err(Error::GoneAway {
                        stream_id,
                        last_stream_id: last,
                    });
                }
            }

            let frame = match self.read_frame() {
                Ok(frame) => frame,
                Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::TimedOut => {
                    // Caller's deadline hit: abandon the stream, keep the
                    // connection.
                    self.cancel(stream_id)?;
                    return Err(Error::Cancelled(stream_id));
                }
                Err(err) => return Err(err),
            };
            self.dispatch(frame)?;
        }
    }

    /// Abort one stream with RST_STREAM CANCEL. The connection stays usable.
    pub fn cancel(&mut self, stream_id: StreamId) -> Result<(), Error> {
        self.streams.remove(stream_id);
        self.write_frame(&Frame::RstStream {
            stream_id,
            error_code: ErrorCode::Cancel,
        })
    }

    /// Best-effort graceful shutdown.
    pub fn close(mut self) {
        if !self.closed {
            let _ = self.write_frame(&Frame::Goaway {
                last_stream_id: 0,
                error_code: ErrorCode::NoError,
                debug_data: bytes::Bytes::new(),
            });
        }
        self.session.close();
    }

    fn read_frame(&mut self) -> Result<Frame, Error> {
        loop {
            match codec::decode_frame(&self.recv, self.local.max_frame_size()) {
                Ok(Some((frame, consumed))) => {
                    self.recv.advance(consumed);
                    tracing::trace!(frame = frame.name(), stream_id = frame.stream_id(), "recv");
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(err) => return self.fail_connection(err),
            }

            let mut chunk = [0u8; 8192];
            let n = self.session.read(&mut chunk)?;
            if n == 0 {
                self.closed = true;
                return Err(Error::ConnectionClosed);
            }
            self.recv.extend_from_slice(&chunk[..n]);
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        codec::encode_frame(frame, &mut buf);
        self.session.write_all(&buf)?;
        Ok(())
    }

    /// Queue HEADERS for `block`, splitting into CONTINUATION frames when it
    /// exceeds the peer's maximum frame size.
    fn write_header_block(
        &mut self,
        out: &mut BytesMut,
        stream_id: StreamId,
        block: &[u8],
        end_stream: bool,
    ) -> Result<(), Error> {
        let max = self.remote.max_frame_size() as usize;
        if block.len() <= max {
            codec::encode_frame(
                &Frame::Headers {
                    stream_id,
                    block: bytes::Bytes::copy_from_slice(block),
                    end_stream,
                    end_headers: true,
                },
                out,
            );
            return Ok(());
        }

        let mut chunks = block.chunks(max);
        let first = chunks.next().expect("non-empty block");
        codec::encode_frame(
            &Frame::Headers {
                stream_id,
                block: bytes::Bytes::copy_from_slice(first),
                end_stream,
                end_headers: false,
            },
            out,
        );
        let mut rest = chunks.peekable();
        while let Some(chunk) = rest.next() {
            codec::encode_frame(
                &Frame::Continuation {
                    stream_id,
                    block: bytes::Bytes::copy_from_slice(chunk),
                    end_headers: rest.peek().is_none(),
                },
                out,
            );
        }
        Ok(())
    }

    /// Queue DATA frames for the request body, final frame carrying
    /// END_STREAM. Probe bodies are small; if the peer's windows cannot
    /// take the whole body up front we bail instead of blocking.
    fn queue_data(
        &mut self,
        out: &mut BytesMut,
        stream_id: StreamId,
        body: &[u8],
    ) -> Result<(), Error> {
        let len = body.len() as i64;
        let stream_window = self
            .streams
            .get(stream_id)
            .map(|s| s.send_window)
            .unwrap_or(0);
        if len > self.conn_send_window || len > stream_window {
            return Err(Error::FlowControl(format!(
                "request body of {len} bytes exceeds peer window"
            )));
        }
        self.conn_send_window -= len;
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.send_window -= len;
        }

        let max = self.remote.max_frame_size() as usize;
        let mut chunks = body.chunks(max).peekable();
        while let Some(chunk) = chunks.next() {
            codec::encode_frame(
                &Frame::Data {
                    stream_id,
                    data: bytes::Bytes::copy_from_slice(chunk),
                    end_stream: chunks.peek().is_none(),
                },
                out,
            );
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.state = match stream.state {
                super::stream::StreamState::HalfClosedRemote => {
                    super::stream::StreamState::Closed
                }
                _ => super::stream::StreamState::HalfClosedLocal,
            };
        }
        Ok(())
    }

    /// Tear the connection down over a protocol violation: GOAWAY, close,
    /// surface the error. Pending streams all fail with the returned error.
    fn fail_connection<T>(&mut self, err: Error) -> Result<T, Error> {
        let code = match &err {
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            _ => ErrorCode::ProtocolError,
        };
        tracing::debug!(error = %err, code = %code, "connection error, sending GOAWAY");
        let _ = self.write_frame(&Frame::Goaway {
            last_stream_id: 0,
            error_code: code,
            debug_data: bytes::Bytes::new(),
        });
        self.session.close();
        self.closed = true;
        Err(err)
    }

    fn dispatch(&mut self, frame: Frame) -> Result<(), Error> {
        // While a header block is open, nothing but its CONTINUATION frames
        // may arrive.
        if let Some(pending_id) = self.pending_block.as_ref().map(|p| p.stream_id) {
            let ok = matches!(
                &frame,
                Frame::Continuation { stream_id, .. } if *stream_id == pending_id
            );
            if !ok {
                return self.fail_connection(Error::Protocol(format!(
                    "expected CONTINUATION for stream {pending_id}, got {}",
                    frame.name()
                )));
            }
        }

        match frame {
            Frame::Settings { ack, settings } => self.on_settings(ack, settings),
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
            } => {
                if end_headers {
                    self.finish_header_block(stream_id, &block, end_stream)
                } else {
                    self.open_header_block(stream_id, &block, end_stream)
                }
            }
            Frame::Continuation {
                stream_id,
                block,
                end_headers,
            } => self.on_continuation(stream_id, &block, end_headers),
            Frame::Data {
                stream_id,
                data,
                end_stream,
            } => self.on_data(stream_id, &data, end_stream),
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                tracing::debug!(stream_id, code = %error_code, "stream reset by peer");
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.reset = Some(error_code);
                    stream.state = super::stream::StreamState::Closed;
                }
                Ok(())
            }
            Frame::Ping { ack, data } => {
                if !ack {
                    self.write_frame(&Frame::Ping { ack: true, data })?;
                }
                Ok(())
            }
            Frame::Goaway {
                last_stream_id,
                error_code,
                ..
            } => {
                tracing::debug!(last_stream_id, code = %error_code, "peer sent GOAWAY");
                self.goaway = Some(last_stream_id);
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment),
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                ..
            } => {
                // Pushed streams are refused outright.
                tracing::debug!(stream_id, promised_stream_id, "refusing pushed stream");
                self.write_frame(&Frame::RstStream {
                    stream_id: promised_stream_id,
                    error_code: ErrorCode::RefusedStream,
                })
            }
            Frame::Unknown {
                frame_type,
                stream_id,
            } => {
                tracing::trace!(frame_type, stream_id, "ignoring frame");
                Ok(())
            }
        }
    }

    fn on_settings(&mut self, ack: bool, settings: Settings) -> Result<(), Error> {
        if ack {
            return Ok(());
        }

        let old_window = self.remote.initial_window_size() as i64;
        self.remote.merge(&settings);
        let delta = self.remote.initial_window_size() as i64 - old_window;
        if delta != 0 {
            self.streams.adjust_send_windows(delta);
        }

        // Our dynamic table must fit under what the peer advertised.
        let table_cap = self
            .remote
            .header_table_size()
            .min(DEFAULT_HEADER_TABLE_SIZE) as usize;
        self.encoder.set_capacity(table_cap);

        self.remote_settings_seen = true;
        self.write_frame(&Frame::Settings {
            ack: true,
            settings: Settings::new(),
        })
    }

    fn open_header_block(
        &mut self,
        stream_id: StreamId,
        block: &[u8],
        end_stream: bool,
    ) -> Result<(), Error> {
        if block.len() > MAX_HEADER_BLOCK {
            return self.fail_connection(Error::Protocol(format!(
                "header block exceeds {MAX_HEADER_BLOCK} bytes"
            )));
        }
        self.pending_block = Some(PendingBlock {
            stream_id,
            end_stream,
            buf: block.to_vec(),
        });
        Ok(())
    }

    fn on_continuation(
        &mut self,
        stream_id: StreamId,
        block: &[u8],
        end_headers: bool,
    ) -> Result<(), Error> {
        let pending_len = match &self.pending_block {
            Some(pending) => pending.buf.len(),
            None => {
                return self.fail_connection(Error::Protocol(
                    "CONTINUATION without an open header block".to_string(),
                ));
            }
        };
        if pending_len + block.len() > MAX_HEADER_BLOCK {
            return self.fail_connection(Error::Protocol(format!(
                "header block exceeds {MAX_HEADER_BLOCK} bytes"
            )));
        }

        let pending = self.pending_block.as_mut().expect("pending block");
        pending.buf.extend_from_slice(block);

        if end_headers {
            let pending = self.pending_block.take().expect("pending block");
            debug_assert_eq!(pending.stream_id, stream_id);
            self.finish_header_block(pending.stream_id, &pending.buf, pending.end_stream)?;
        }
        Ok(())
    }

    /// Decode a complete header block and hand it to its stream. Decoding
    /// always happens, known stream or not: the HPACK dynamic table is
    /// connection state.
    fn finish_header_block(
        &mut self,
        stream_id: StreamId,
        block: &[u8],
        end_stream: bool,
    ) -> Result<(), Error> {
        if block.len() > MAX_HEADER_BLOCK {
            return self.fail_connection(Error::Protocol(format!(
                "header block exceeds {MAX_HEADER_BLOCK} bytes"
            )));
        }
        let fields = match self.decoder.decode(block) {
            Ok(fields) => fields,
            Err(err) => return self.fail_connection(err),
        };

        match self.streams.get_mut(stream_id) {
            Some(stream) => {
                if let Err(err) = stream.response.apply_headers(fields) {
                    return self.fail_connection(err);
                }
                if end_stream {
                    stream.close_remote();
                }
            }
            None => {
                tracing::trace!(stream_id, "headers for unknown stream dropped");
            }
        }
        Ok(())
    }

    fn on_data(&mut self, stream_id: StreamId, data: &[u8], end_stream: bool) -> Result<(), Error> {
        // Connection-level accounting covers every DATA byte, stream known
        // or not, because the peer spent its window on them either way.
        self.conn_recv_consumed += data.len() as u32;
        if self.conn_recv_consumed >= WINDOW_UPDATE_THRESHOLD {
            let increment = std::mem::take(&mut self.conn_recv_consumed);
            self.write_frame(&Frame::WindowUpdate {
                stream_id: 0,
                increment,
            })?;
        }

        match self.streams.get(stream_id).map(|s| s.recv_closed()) {
            None => {
                tracing::trace!(stream_id, "data for unknown stream dropped");
                return Ok(());
            }
            Some(true) => {
                // Nothing may follow END_STREAM on this stream but RST_STREAM.
                return self.fail_connection(Error::Protocol(format!(
                    "DATA on closed stream {stream_id}"
                )));
            }
            Some(false) => {}
        }

        let stream = self.streams.get_mut(stream_id).expect("stream exists");
        stream.response.push_data(data);
        stream.recv_consumed += data.len() as u32;
        if end_stream {
            stream.close_remote();
        } else if stream.recv_consumed >= WINDOW_UPDATE_THRESHOLD {
            let increment = std::mem::take(&mut stream.recv_consumed);
            self.write_frame(&Frame::WindowUpdate {
                stream_id,
                increment,
            })?;
        }
        Ok(())
    }

    fn on_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<(), Error> {
        if increment == 0 {
            return self.fail_connection(Error::Protocol(
                "WINDOW_UPDATE with zero increment".to_string(),
            ));
        }
        if stream_id == 0 {
            self.conn_send_window += increment as i64;
            if self.conn_send_window > 0x7fff_ffff {
                return self.fail_connection(Error::FlowControl(
                    "connection send window overflow".to_string(),
                ));
            }
        } else if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.send_window += increment as i64;
        }
        Ok(())
    }
}

/// Map a request onto HPACK fields: pseudo-headers first, then the caller's
/// headers minus the connection-specific ones that have no place on HTTP/2.
fn request_fields(request: &Request) -> Vec<HeaderField> {
    const STRIPPED: [&str; 7] = [
        "host",
        "connection",
        "upgrade",
        "http2-settings",
        "keep-alive",
        "proxy-connection",
        "transfer-encoding",
    ];

    let scheme = match request.target.scheme() {
        Scheme::Http => "http",
        Scheme::Https => "https",
    };

    let mut fields = vec![
        HeaderField::new(":method", request.method.as_str()),
        HeaderField::new(":scheme", scheme),
        HeaderField::new(":authority", request.authority()),
        HeaderField::new(":path", request.target.path_and_query()),
    ];
    for (name, value) in request.headers.iter() {
        if STRIPPED.iter().any(|s| name.eq_ignore_ascii_case(s)) {
            continue;
        }
        fields.push(HeaderField::new(name.to_ascii_lowercase(), value));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Method;
    use crate::target::Target;

    #[test]
    fn request_fields_order_and_filtering() {
        let target = Target::parse("http://victim.example:8080/admin?probe=1").unwrap();
        let mut request = Request::new(Method::Get, target);
        request.headers.insert("X-Api-Key", "secret");
        request.headers.insert("Connection", "keep-alive");
        request.headers.insert("Host", "ignored.example");

        let fields = request_fields(&request);
        let names: Vec<&[u8]> = fields.iter().map(|f| f.name.as_slice()).collect();
        assert_eq!(
            names,
            vec![
                b":method".as_slice(),
                b":scheme",
                b":authority",
                b":path",
                b"x-api-key",
            ]
        );
        assert_eq!(fields[2].value, b"victim.example:8080");
        assert_eq!(fields[3].value, b"/admin?probe=1");
    }

    #[test]
    fn host_override_becomes_authority() {
        let target = Target::parse("http://front.example/").unwrap();
        let mut request = Request::get(target);
        request.host = Some("internal.example".to_string());

        let fields = request_fields(&request);
        assert_eq!(fields[2], HeaderField::new(":authority", "internal.example"));
    }
}
