pub mod accessory;
pub mod config;
pub mod error;
pub mod network;
pub mod server;
pub mod session;

pub use accessory::CastSwitch;
pub use config::Config;
pub use error::{CastError, Result};
pub use session::Supervisor;

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// The device matched by discovery.
///
/// Built once per matching advertisement and swapped in whole; a reconnect
/// never edits an existing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub device_type: String,
    pub ip_address: IpAddr,
    pub port: u16,
    pub device_id: String,
}

impl DeviceIdentity {
    /// `ip:port` string shown as a diagnostic property.
    pub fn address(&self) -> String {
        match self.ip_address {
            IpAddr::V4(ip) => format!("{}:{}", ip, self.port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, self.port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// The two properties the host platform observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExposedState {
    /// Primary switch, follows casting state immediately.
    pub casting_on: bool,
    /// Motion-style signal, subject to the switch-off delay.
    pub streaming_detected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(ip: &str) -> DeviceIdentity {
        DeviceIdentity {
            name: "Living Room".into(),
            device_type: "Chromecast".into(),
            ip_address: ip.parse().unwrap(),
            port: 8009,
            device_id: "abc".into(),
        }
    }

    #[test]
    fn address_formats_v4_and_v6() {
        assert_eq!(identity("192.168.1.20").address(), "192.168.1.20:8009");
        assert_eq!(identity("fe80::1").address(), "[fe80::1]:8009");
    }

    #[test]
    fn connection_state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Connecting).unwrap();
        assert_eq!(json, "\"connecting\"");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
