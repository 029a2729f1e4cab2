//! Incremental response-head parsing.
//!
//! The upgrade leg must stop consuming the socket at the exact end of the
//! `101` head: every byte after the blank line already belongs to HTTP/2.
//! The parser therefore buffers until the head terminator and hands back
//! whatever it over-read as leftover.

use super::{Headers, ParseError, MAX_HEAD_BYTES};

/// Parsed status line and headers of an HTTP/1.x response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

/// Buffering parser for a response head.
#[derive(Default)]
pub struct HeadParser {
    buf: Vec<u8>,
}

impl HeadParser {
    pub fn new() -> Self {
        HeadParser { buf: Vec::new() }
    }

    /// Feed a chunk. Returns the parsed head plus any bytes that arrived
    /// after the blank line once the head is complete, `None` until then.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<(ResponseHead, Vec<u8>)>, ParseError> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > MAX_HEAD_BYTES {
            return Err(ParseError::HeadTooLarge);
        }

        let Some(end) = find_head_end(&self.buf) else {
            return Ok(None);
        };

        let head = parse_head(&self.buf[..end])?;
        let leftover = self.buf[end + 4..].to_vec();
        self.buf.clear();
        Ok(Some((head, leftover)))
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(raw: &[u8]) -> Result<ResponseHead, ParseError> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| ParseError::StatusLine(String::new()))?;
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = Headers::parse_line(line)?;
        headers.insert(name, value);
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

/// Parse `HTTP/1.1 101 Switching Protocols`. The reason phrase is optional.
pub fn parse_status_line(line: &str) -> Result<(u16, String), ParseError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| ParseError::StatusLine(line.to_string()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::StatusLine(line.to_string()));
    }

    let code = parts
        .next()
        .ok_or_else(|| ParseError::StatusLine(line.to_string()))?;
    let status: u16 = code
        .parse()
        .map_err(|_| ParseError::StatusCode(code.to_string()))?;
    if !(100..600).contains(&status) {
        return Err(ParseError::StatusCode(code.to_string()));
    }

    let reason = parts.next().unwrap_or("").to_string();
    Ok((status, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_switching_protocols() {
        let mut parser = HeadParser::new();
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n";
        let (head, leftover) = parser.feed(raw).unwrap().unwrap();

        assert_eq!(head.status, 101);
        assert_eq!(head.reason, "Switching Protocols");
        assert_eq!(head.headers.get("upgrade"), Some("h2c"));
        assert!(leftover.is_empty());
    }

    #[test]
    fn keeps_post_head_bytes_as_leftover() {
        let mut parser = HeadParser::new();
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\n\r\n\x00\x00\x00\x04\x00";
        let (head, leftover) = parser.feed(raw).unwrap().unwrap();

        assert_eq!(head.status, 101);
        assert_eq!(leftover, b"\x00\x00\x00\x04\x00");
    }

    #[test]
    fn incremental_feeding() {
        let mut parser = HeadParser::new();
        assert!(parser.feed(b"HTTP/1.1 2").unwrap().is_none());
        assert!(parser.feed(b"00 OK\r\nContent-Length: 2\r\n").unwrap().is_none());
        let (head, leftover) = parser.feed(b"\r\nhi").unwrap().unwrap();

        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get("content-length"), Some("2"));
        assert_eq!(leftover, b"hi");
    }

    #[test]
    fn status_line_without_reason() {
        let (status, reason) = parse_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(status, 404);
        assert_eq!(reason, "");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_status_line("ICY 200 OK").is_err());
        assert!(parse_status_line("HTTP/1.1 banana OK").is_err());
        assert!(parse_status_line("HTTP/1.1 99 Too Low").is_err());
    }
}
