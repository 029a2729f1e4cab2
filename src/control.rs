//! The control transport: what the frontend says when nothing is smuggled.
//!
//! Control probes establish the baseline response for a target. They use a
//! normal path: plain HTTP/1.1 for http targets, and TLS with ALPN for
//! https targets, speaking HTTP/2 when the server selects it and falling
//! back to HTTP/1.1 otherwise. No upgrade is ever attempted here.

use bytes::Bytes;

use crate::error::ProbeError;
use crate::h2::ClientConn;
use crate::http1::{chunked::ChunkedDecoder, HeadParser, Headers, ResponseHead};
use crate::message::{Method, Request, Response};
use crate::session::{dial, NetSession, Transport};
use crate::smuggle::ConnConfig;
use crate::target::Scheme;
use crate::tls::{selected_alpn, TlsClientConfig};

/// Issues control probes. One instance is shared by all control workers;
/// each probe gets a fresh connection.
pub struct ControlClient {
    config: ConnConfig,
}

impl ControlClient {
    pub fn new(config: ConnConfig) -> Self {
        ControlClient { config }
    }

    /// Fetch `request` over the control path.
    pub fn fetch(&self, request: &Request) -> Result<Response, ProbeError> {
        match request.target.scheme() {
            Scheme::Http => {
                let tls = TlsClientConfig::builder().build()?;
                let transport = dial(&request.target, self.config.dial_timeout, &tls)?;
                self.fetch_h1(request, transport)
            }
            Scheme::Https => {
                let tls = TlsClientConfig::builder()
                    .verify_peer(self.config.verify_tls)
                    .alpn(&["h2", "http/1.1"])
                    .build()?;
                let transport = dial(&request.target, self.config.dial_timeout, &tls)?;
                let negotiated_h2 = match &transport {
                    Transport::Tls(stream) => {
                        selected_alpn(stream).map_or(false, |proto| proto == b"h2")
                    }
                    Transport::Tcp(_) => false,
                };
                if negotiated_h2 {
                    self.fetch_h2(request, transport)
                } else {
                    self.fetch_h1(request, transport)
                }
            }
        }
    }

    fn fetch_h2(&self, request: &Request, transport: Transport) -> Result<Response, ProbeError> {
        tracing::trace!(target = %request.target, "control request over h2");
        let mut session = NetSession::new(transport);
        session.set_timeout(self.config.request_timeout);

        let mut conn = ClientConn::handshake(session)?;
        let response = conn.round_trip(request);
        conn.close();
        Ok(response?)
    }

    fn fetch_h1(&self, request: &Request, transport: Transport) -> Result<Response, ProbeError> {
        tracing::trace!(target = %request.target, "control request over http/1.1");
        let mut session = NetSession::new(transport);
        session.set_timeout(self.config.request_timeout);

        session.write_all(&serialize_h1_request(request))?;

        let mut parser = HeadParser::new();
        let (head, leftover) = loop {
            let mut chunk = [0u8; 4096];
            let n = session.read(&mut chunk)?;
            if n == 0 {
                return Err(ProbeError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before response head",
                )));
            }
            if let Some(done) = parser.feed(&chunk[..n])? {
                break done;
            }
        };

        let body = read_h1_body(&mut session, request.method, &head, leftover)?;
        Ok(Response {
            status: head.status,
            headers: head.headers,
            body: Bytes::from(body),
        })
    }
}

/// Serialize a plain HTTP/1.1 request. `Connection: close` keeps the
/// bodyless-length case unambiguous: the server ends the body by closing.
fn serialize_h1_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(request.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.target.path_and_query().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let mut put = |name: &str, value: &str| {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    };
    put("Host", &request.authority());
    put("Connection", "close");
    for (name, value) in request.headers.iter() {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        put(name, value);
    }
    if !request.body.is_empty() {
        put("Content-Length", &request.body.len().to_string());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&request.body);
    out
}

fn read_h1_body(
    session: &mut NetSession,
    method: Method,
    head: &ResponseHead,
    leftover: Vec<u8>,
) -> Result<Vec<u8>, ProbeError> {
    if method == Method::Head || head.status == 204 || head.status == 304 {
        return Ok(Vec::new());
    }

    if is_chunked(&head.headers) {
        let mut decoder = ChunkedDecoder::new();
        decoder.feed(&leftover)?;
        while !decoder.is_done() {
            let mut chunk = [0u8; 4096];
            let n = session.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            decoder.feed(&chunk[..n])?;
        }
        return Ok(decoder.into_body());
    }

    if let Some(raw_len) = head.headers.get("Content-Length") {
        let total: usize = raw_len.trim().parse().map_err(|_| {
            ProbeError::Http1(crate::http1::ParseError::ContentLength(raw_len.to_string()))
        })?;
        let mut body = leftover;
        body.truncate(total.min(body.len()));
        while body.len() < total {
            let mut chunk = [0u8; 4096];
            let n = session.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            let need = total - body.len();
            body.extend_from_slice(&chunk[..n.min(need)]);
        }
        return Ok(body);
    }

    // No framing: read until the server closes.
    let mut body = leftover;
    loop {
        let mut chunk = [0u8; 4096];
        match session.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => break,
            Err(err) => return Err(ProbeError::Transport(err)),
        }
    }
    Ok(body)
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get("Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Target;

    #[test]
    fn h1_request_layout() {
        let mut request = Request::get(Target::parse("http://victim.example/admin").unwrap());
        request.headers.insert("X-Probe", "1");

        let text = String::from_utf8(serialize_h1_request(&request)).unwrap();
        assert_eq!(
            text,
            "GET /admin HTTP/1.1\r\n\
             Host: victim.example\r\n\
             Connection: close\r\n\
             X-Probe: 1\r\n\
             \r\n"
        );
    }

    #[test]
    fn h1_request_with_body_gets_content_length() {
        let mut request = Request::new(
            Method::Post,
            Target::parse("http://victim.example/submit").unwrap(),
        );
        request.body = b"a=1".to_vec();

        let text = String::from_utf8(serialize_h1_request(&request)).unwrap();
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("\r\n\r\na=1"));
    }

    #[test]
    fn host_override_applies_to_control_requests() {
        let mut request = Request::get(Target::parse("http://victim.example/").unwrap());
        request.host = Some("other.example".to_string());

        let text = String::from_utf8(serialize_h1_request(&request)).unwrap();
        assert!(text.contains("Host: other.example\r\n"));
    }

    #[test]
    fn control_fetch_over_h1() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::thread;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            let n = stream.read(&mut buf).unwrap();
            let text = String::from_utf8_lossy(&buf[..n]).into_owned();
            assert!(text.starts_with("GET /status HTTP/1.1\r\n"));
            stream
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 6\r\nServer: edge\r\n\r\ndenied")
                .unwrap();
        });

        let url = format!("http://127.0.0.1:{}/status", addr.port());
        let request = Request::get(Target::parse(&url).unwrap());
        let client = ControlClient::new(ConnConfig::default());
        let response = client.fetch(&request).unwrap();

        assert_eq!(response.status, 403);
        assert_eq!(response.headers.get("server"), Some("edge"));
        assert_eq!(&response.body[..], b"denied");

        handle.join().unwrap();
    }

    #[test]
    fn control_fetch_chunked_body() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::thread;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            stream.read(&mut buf).unwrap();
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
                )
                .unwrap();
        });

        let url = format!("http://127.0.0.1:{}/", addr.port());
        let request = Request::get(Target::parse(&url).unwrap());
        let client = ControlClient::new(ConnConfig::default());
        let response = client.fetch(&request).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"hello");

        handle.join().unwrap();
    }
}
