//! Probe targets: parsed URLs with a resolved scheme, host and port.

use url::Url;

use crate::error::ProbeError;

/// URL scheme accepted for probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A parsed probe target. Immutable after parse.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Target {
    /// Parse a target URL. Only http and https schemes are accepted;
    /// the port defaults to 80 or 443 when absent.
    pub fn parse(raw: &str) -> Result<Self, ProbeError> {
        let url = Url::parse(raw).map_err(|err| ProbeError::Config {
            url: raw.to_string(),
            reason: err.to_string(),
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(ProbeError::UnexpectedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::Config {
                url: raw.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Target {
            url,
            scheme,
            host,
            port,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host[:port] form used for `Host` headers and `:authority`.
    /// The port is included only when it was explicit in the URL, matching
    /// what a browser would have sent.
    pub fn authority(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Path plus query string, as sent on the request line / `:path`.
    pub fn path_and_query(&self) -> String {
        let mut out = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            out.push('?');
            out.push_str(query);
        }
        out
    }

    /// A copy of this target pointing at `other`'s host and port, keeping
    /// this target's scheme, path and query. Used by the control transport
    /// to send a smuggle path to the base host.
    pub fn redirected_to(&self, other: &Target) -> Target {
        let mut url = self.url.clone();
        // set_host only fails for cannot-be-a-base URLs, which cannot occur
        // for an already-validated http(s) target.
        let _ = url.set_host(Some(other.host()));
        let _ = url.set_port(other.url.port());
        Target {
            url,
            scheme: self.scheme,
            host: other.host.clone(),
            port: other.port,
        }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}
