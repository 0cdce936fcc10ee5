use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use super::protocol::DEFAULT_RECEIVE_BUFFER;

/// Processed reliable messages remembered for deduplication.
pub const DEFAULT_CONFIRMED_HISTORY: usize = 512;

/// Frequencies are in Hz, timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub broadcasting_frequency: f64,
    pub sending_frequency: f64,
    pub connecting_frequency: f64,
    pub beacon_frequency: f64,
    /// Silence after which a connected client tries to reconnect.
    pub reconnect_timeout_secs: f64,
    pub disconnect_timeout_secs: f64,
    pub auto_connect: bool,
    pub receive_buffer_size: usize,
    pub broadcast_addresses: Vec<IpAddr>,
    pub confirmed_history: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broadcasting_frequency: 0.5,
            sending_frequency: 10.0,
            connecting_frequency: 2.0,
            beacon_frequency: 2.0,
            reconnect_timeout_secs: 6.0,
            disconnect_timeout_secs: 12.0,
            auto_connect: false,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER,
            broadcast_addresses: vec![
                IpAddr::V4(Ipv4Addr::new(192, 168, 0, 255)),
                IpAddr::V4(Ipv4Addr::new(10, 16, 0, 255)),
                IpAddr::V4(Ipv4Addr::LOCALHOST),
            ],
            confirmed_history: DEFAULT_CONFIRMED_HISTORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub sending_frequency: f64,
    pub beacon_frequency: f64,
    pub postpone_timeout_secs: f64,
    pub disconnect_timeout_secs: f64,
    pub receive_buffer_size: usize,
    pub confirmed_history: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sending_frequency: 10.0,
            beacon_frequency: 2.0,
            postpone_timeout_secs: 6.0,
            disconnect_timeout_secs: 10.0,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER,
            confirmed_history: DEFAULT_CONFIRMED_HISTORY,
        }
    }
}
