//! The HTTP/1.1 upgrade request.
//!
//! The exact bytes matter: some frontends are case- or order-sensitive
//! about the handshake headers, so `Upgrade`, `Connection` and
//! `HTTP2-Settings` keep their canonical casing and are emitted in that
//! order, each independently overridable or omittable.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::h2::Settings;
use crate::message::Request;

/// Default `Upgrade` header value.
pub const DEFAULT_UPGRADE_VALUE: &str = "h2c";

/// Default `Connection` header value.
pub const DEFAULT_CONNECTION_VALUE: &str = "Upgrade, HTTP2-Settings";

/// Default `HTTP2-Settings` token: base64url (no padding) of a SETTINGS
/// payload advertising MAX_CONCURRENT_STREAMS=100, a 2^30 initial window
/// and push disabled.
pub const DEFAULT_SETTINGS_TOKEN: &str = "AAMAAABkAARAAAAAAAIAAAAA";

/// Per-header control over the upgrade handshake. `None` drops the header
/// from the request entirely.
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub upgrade: Option<String>,
    pub connection: Option<String>,
    pub http2_settings: Option<String>,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        UpgradeOptions {
            upgrade: Some(DEFAULT_UPGRADE_VALUE.to_string()),
            connection: Some(DEFAULT_CONNECTION_VALUE.to_string()),
            http2_settings: Some(DEFAULT_SETTINGS_TOKEN.to_string()),
        }
    }
}

impl UpgradeOptions {
    pub fn new() -> Self {
        UpgradeOptions::default()
    }

    pub fn upgrade_value(mut self, value: impl Into<String>) -> Self {
        self.upgrade = Some(value.into());
        self
    }

    pub fn connection_value(mut self, value: impl Into<String>) -> Self {
        self.connection = Some(value.into());
        self
    }

    /// Override the advertised SETTINGS token. Sent verbatim.
    pub fn settings_token(mut self, value: impl Into<String>) -> Self {
        self.http2_settings = Some(value.into());
        self
    }

    /// Advertise a specific SETTINGS value set instead of the default token.
    pub fn advertise(mut self, settings: &Settings) -> Self {
        self.http2_settings = Some(settings_token(settings));
        self
    }

    pub fn without_upgrade(mut self) -> Self {
        self.upgrade = None;
        self
    }

    pub fn without_connection(mut self) -> Self {
        self.connection = None;
        self
    }

    pub fn without_settings(mut self) -> Self {
        self.http2_settings = None;
        self
    }
}

/// Encode a SETTINGS value set as an `HTTP2-Settings` token: base64url of
/// the frame payload, without padding (RFC 7540 Section 3.2.1).
pub fn settings_token(settings: &Settings) -> String {
    URL_SAFE_NO_PAD.encode(settings.to_payload())
}

/// Serialize the upgrade request. Layout:
///
/// ```text
/// METHOD path HTTP/1.1
/// Host: authority
/// Upgrade: h2c
/// Connection: Upgrade, HTTP2-Settings
/// HTTP2-Settings: <token>
/// <caller headers>
/// ```
///
/// The body is always empty on the upgrade leg; disabled headers are
/// omitted entirely rather than sent blank.
pub fn serialize_upgrade_request(request: &Request, opts: &UpgradeOptions) -> Vec<u8> {
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
    if let Some(value) = &opts.upgrade {
        put("Upgrade", value);
    }
    if let Some(value) = &opts.connection {
        put("Connection", value);
    }
    if let Some(value) = &opts.http2_settings {
        put("HTTP2-Settings", value);
    }
    for (name, value) in request.headers.iter() {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        put(name, value);
    }

    out.extend_from_slice(b"\r\n");
    out
}
