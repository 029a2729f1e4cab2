//! Request and response value types shared by the smuggled and control paths.

use bytes::Bytes;

use crate::error::ProbeError;
use crate::http1::Headers;
use crate::target::Target;

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn parse(s: &str) -> Result<Self, ProbeError> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            other => Err(ProbeError::Config {
                url: other.to_string(),
                reason: "unknown HTTP method".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A probe request. The same value drives the upgrade leg, the post-upgrade
/// HTTP/2 streams and the control transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: Target,
    pub headers: Headers,
    /// Overrides the authority derived from the URL. Set via a `Host`
    /// request header; becomes `:authority` on HTTP/2.
    pub host: Option<String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, target: Target) -> Self {
        Request {
            method,
            target,
            headers: Headers::new(),
            host: None,
            body: Vec::new(),
        }
    }

    pub fn get(target: Target) -> Self {
        Request::new(Method::Get, target)
    }

    /// The effective authority: explicit `Host` override first, URL second.
    pub fn authority(&self) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| self.target.authority())
    }
}

/// A fully-buffered response from either transport.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// Raw-ish dump of the response head for human inspection.
    pub fn dump_head(&self, protocol: &str) -> String {
        let mut out = format!("{} {}\r\n", protocol, self.status);
        for (name, value) in self.headers.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!(Method::parse("get").unwrap(), Method::Get);
        assert_eq!(Method::parse("POST").unwrap(), Method::Post);
        assert!(Method::parse("YOLO").is_err());
    }

    #[test]
    fn authority_prefers_host_override() {
        let target = Target::parse("http://front.example/admin").unwrap();
        let mut req = Request::get(target);
        assert_eq!(req.authority(), "front.example");

        req.host = Some("internal.example".to_string());
        assert_eq!(req.authority(), "internal.example");
    }

    #[test]
    fn dump_head_lists_headers() {
        let mut headers = Headers::new();
        headers.insert("server", "edge");
        let resp = Response {
            status: 403,
            headers,
            body: Bytes::new(),
        };
        assert_eq!(resp.dump_head("HTTP/2"), "HTTP/2 403\r\nserver: edge\r\n");
    }
}
