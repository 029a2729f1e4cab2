//! The smuggling engine: HTTP/1.1 upgrade to h2c on a raw socket, then an
//! HTTP/2 client connection over the same bytes.

mod conn;
mod upgrade;

pub use conn::{ConnConfig, SmuggledConn};
pub use upgrade::{
    serialize_upgrade_request, settings_token, UpgradeOptions, DEFAULT_CONNECTION_VALUE,
    DEFAULT_SETTINGS_TOKEN, DEFAULT_UPGRADE_VALUE,
};
