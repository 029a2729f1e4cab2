//! TLS client setup.
//!
//! Certificate verification is off by default: the interesting targets are
//! misconfigured edge infrastructure with self-signed or mismatched certs.
//! ALPN is only advertised on the control path; the smuggling path must look
//! like a plain HTTP/1.1 client to the frontend.

use std::net::TcpStream;

use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslStream, SslVerifyMode};

use crate::error::ProbeError;

/// Client-side TLS configuration.
#[derive(Clone)]
pub struct TlsClientConfig {
    ctx: SslContext,
}

/// Builder for [`TlsClientConfig`].
pub struct TlsClientBuilder {
    verify: bool,
    alpn: Vec<u8>,
}

impl TlsClientBuilder {
    fn new() -> Self {
        TlsClientBuilder {
            verify: false,
            alpn: Vec::new(),
        }
    }

    /// Enable peer certificate verification. Off by default.
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Advertise ALPN protocols, wire-encoded as length-prefixed names.
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        let mut encoded = Vec::new();
        for proto in protocols {
            encoded.push(proto.len() as u8);
            encoded.extend_from_slice(proto.as_bytes());
        }
        self.alpn = encoded;
        self
    }

    pub fn build(self) -> Result<TlsClientConfig, ProbeError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(|err| ProbeError::Tls(err.to_string()))?;

        ctx.set_verify(if self.verify {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        if !self.alpn.is_empty() {
            ctx.set_alpn_protos(&self.alpn)
                .map_err(|err| ProbeError::Tls(err.to_string()))?;
        }

        Ok(TlsClientConfig { ctx: ctx.build() })
    }
}

impl TlsClientConfig {
    pub fn builder() -> TlsClientBuilder {
        TlsClientBuilder::new()
    }

    /// Perform the client handshake over an established TCP stream.
    /// `servername` is sent as SNI.
    pub fn connect(
        &self,
        stream: TcpStream,
        servername: &str,
    ) -> Result<SslStream<TcpStream>, ProbeError> {
        let mut ssl = Ssl::new(&self.ctx).map_err(|err| ProbeError::Tls(err.to_string()))?;
        ssl.set_hostname(servername)
            .map_err(|err| ProbeError::Tls(err.to_string()))?;

        ssl.connect(stream)
            .map_err(|err| ProbeError::Tls(err.to_string()))
    }
}

/// The ALPN protocol the peer selected, if any.
pub fn selected_alpn(stream: &SslStream<TcpStream>) -> Option<Vec<u8>> {
    stream.ssl().selected_alpn_protocol().map(|p| p.to_vec())
}
