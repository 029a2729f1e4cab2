//! Per-stream state and client-side stream allocation.

use bytes::{Bytes, BytesMut};

use super::error::{Error, ErrorCode};
use super::hpack::HeaderField;
use crate::http1::Headers;
use crate::message::Response;

pub type StreamId = u32;

/// Stream states we can actually occupy as a client that never pushes
/// (RFC 7540 Section 5.1, minus the reserved states).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Accumulates a response across HEADERS/CONTINUATION/DATA frames.
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    status: Option<u16>,
    headers: Headers,
    body: BytesMut,
    /// Set once END_STREAM is seen; nothing may follow but RST_STREAM.
    complete: bool,
}

impl ResponseBuilder {
    /// Apply a decoded header block. The first block must carry `:status`;
    /// a later block is trailers, which are parsed but not surfaced.
    pub fn apply_headers(&mut self, fields: Vec<HeaderField>) -> Result<(), Error> {
        if self.status.is_some() {
            tracing::trace!(count = fields.len(), "discarding trailers");
            return Ok(());
        }

        for field in fields {
            let name = String::from_utf8(field.name)
                .map_err(|_| Error::InvalidHeader("non-utf8 header name".to_string()))?;
            let value = String::from_utf8_lossy(&field.value).into_owned();

            if let Some(pseudo) = name.strip_prefix(':') {
                if pseudo == "status" {
                    let status: u16 = value.parse().map_err(|_| {
                        Error::InvalidHeader(format!("bad :status value {value:?}"))
                    })?;
                    self.status = Some(status);
                }
                // Other response pseudo-headers are not a thing; drop them.
            } else {
                self.headers.insert(name, value);
            }
        }

        if self.status.is_none() {
            return Err(Error::InvalidHeader(
                "response header block without :status".to_string(),
            ));
        }
        Ok(())
    }

    pub fn push_data(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn finish(self) -> Result<Response, Error> {
        let status = self.status.ok_or_else(|| {
            Error::Protocol("stream ended without response headers".to_string())
        })?;
        Ok(Response {
            status,
            headers: self.headers,
            body: Bytes::from(self.body),
        })
    }
}

/// One HTTP/2 stream as the client sees it.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    pub state: StreamState,
    pub response: ResponseBuilder,
    pub reset: Option<ErrorCode>,
    /// Peer's send allowance to us is tracked at the connection; this is
    /// our replenishment counter for the stream-level receive window.
    pub recv_consumed: u32,
    pub send_window: i64,
}

impl Stream {
    fn new(id: StreamId, state: StreamState, send_window: i64) -> Self {
        Stream {
            id,
            state,
            response: ResponseBuilder::default(),
            reset: None,
            recv_consumed: 0,
            send_window,
        }
    }

    pub fn recv_closed(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosedRemote | StreamState::Closed
        )
    }

    /// Peer half-closed its direction: HEADERS or DATA carried END_STREAM.
    pub fn close_remote(&mut self) {
        self.response.mark_complete();
        self.state = match self.state {
            StreamState::HalfClosedLocal => StreamState::Closed,
            _ => StreamState::HalfClosedRemote,
        };
    }
}

/// Stream table plus the monotonically-increasing odd allocator.
#[derive(Debug)]
pub struct StreamMap {
    streams: std::collections::HashMap<StreamId, Stream>,
    next_id: StreamId,
}

impl StreamMap {
    /// `first_id` is 1 for a direct connection, 3 when stream 1 was consumed
    /// by the upgrade request.
    pub fn new(first_id: StreamId) -> Self {
        debug_assert!(first_id % 2 == 1);
        StreamMap {
            streams: std::collections::HashMap::new(),
            next_id: first_id,
        }
    }

    pub fn peek_next(&self) -> StreamId {
        self.next_id
    }

    /// Allocate the next client stream. `end_stream` reflects whether the
    /// request already half-closed our side in its HEADERS frame.
    pub fn allocate(&mut self, end_stream: bool, send_window: i64) -> StreamId {
        let id = self.next_id;
        self.next_id += 2;
        let state = if end_stream {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
        self.streams.insert(id, Stream::new(id, state, send_window));
        id
    }

    /// Register stream 1 as the upgrade-request stream: our side is already
    /// half closed, the server owes us the response.
    pub fn register_upgrade_stream(&mut self, send_window: i64) {
        self.streams
            .insert(1, Stream::new(1, StreamState::HalfClosedLocal, send_window));
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn remove(&mut self, id: StreamId) -> Option<Stream> {
        self.streams.remove(&id)
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    pub fn adjust_send_windows(&mut self, delta: i64) {
        for stream in self.streams.values_mut() {
            stream.send_window += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_odd_and_monotonic() {
        let mut map = StreamMap::new(3);
        let a = map.allocate(true, 65_535);
        let b = map.allocate(true, 65_535);
        let c = map.allocate(false, 65_535);
        assert_eq!((a, b, c), (3, 5, 7));
        assert_eq!(map.peek_next(), 9);
        assert_eq!(map.get(3).unwrap().state, StreamState::HalfClosedLocal);
        assert_eq!(map.get(7).unwrap().state, StreamState::Open);
    }

    #[test]
    fn upgrade_stream_is_half_closed_local() {
        let mut map = StreamMap::new(3);
        map.register_upgrade_stream(65_535);
        let stream = map.get(1).unwrap();
        assert_eq!(stream.state, StreamState::HalfClosedLocal);
        assert!(!stream.response.is_complete());
    }

    #[test]
    fn response_builder_happy_path() {
        let mut builder = ResponseBuilder::default();
        builder
            .apply_headers(vec![
                HeaderField::new(":status", "200"),
                HeaderField::new("content-type", "text/plain"),
            ])
            .unwrap();
        builder.push_data(b"hello");
        builder.mark_complete();

        let response = builder.finish().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type"), Some("text/plain"));
        assert_eq!(&response.body[..], b"hello");
    }

    #[test]
    fn trailers_are_parsed_but_dropped() {
        let mut builder = ResponseBuilder::default();
        builder
            .apply_headers(vec![HeaderField::new(":status", "200")])
            .unwrap();
        builder
            .apply_headers(vec![HeaderField::new("x-checksum", "abc")])
            .unwrap();
        builder.mark_complete();

        let response = builder.finish().unwrap();
        assert!(!response.headers.contains("x-checksum"));
    }

    #[test]
    fn first_block_requires_status() {
        let mut builder = ResponseBuilder::default();
        let err = builder
            .apply_headers(vec![HeaderField::new("server", "edge")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn close_remote_transitions() {
        let mut stream = Stream::new(3, StreamState::HalfClosedLocal, 65_535);
        stream.close_remote();
        assert_eq!(stream.state, StreamState::Closed);
        assert!(stream.response.is_complete());

        let mut stream = Stream::new(5, StreamState::Open, 65_535);
        stream.close_remote();
        assert_eq!(stream.state, StreamState::HalfClosedRemote);
    }
}
