//! Router configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::cluster::{DEFAULT_RING_SIZE, DEFAULT_VIRTUAL_POINTS};

use super::cluster::resolve_local_ip;

/// Router endpoint and topic placement configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// WebSocket bind address for peer routers
    /// Default: 0.0.0.0:7947
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Address peers dial to reach this router ("host:port")
    /// If not set, resolved from hostname or falls back to bind
    pub advertise_addr: Option<String>,

    /// WebSocket path of the router endpoint
    #[serde(default = "default_path")]
    pub path: String,

    /// Virtual points per host on the hash ring
    #[serde(default = "default_virtual_points")]
    pub virtual_points: u32,

    /// Number of positions on the hash ring
    #[serde(default = "default_ring_size")]
    pub ring_size: u32,

    /// Timeout for opening a socket to a peer
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7947))
}

fn default_path() -> String {
    "/eventrouter".to_string()
}

fn default_virtual_points() -> u32 {
    DEFAULT_VIRTUAL_POINTS
}

fn default_ring_size() -> u32 {
    DEFAULT_RING_SIZE
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            advertise_addr: None,
            path: default_path(),
            virtual_points: default_virtual_points(),
            ring_size: default_ring_size(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl RouterConfig {
    /// Get the advertise address (what peers use to reach us)
    /// Priority: explicit config > resolved hostname > bind address
    pub fn get_advertise_addr(&self) -> String {
        if let Some(addr) = &self.advertise_addr {
            return addr.clone();
        }

        if self.bind.ip().is_unspecified() {
            if let Some(ip) = resolve_local_ip() {
                return SocketAddr::new(ip, self.bind.port()).to_string();
            }
        }

        self.bind.to_string()
    }
}
