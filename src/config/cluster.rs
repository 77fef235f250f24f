//! Cluster Configuration
//!
//! Membership settings: either a fixed member list or gossip-based discovery.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

/// How the node learns about cluster members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipMode {
    /// Fixed member list from configuration
    #[default]
    Static,
    /// Gossip-based discovery (chitchat)
    Gossip,
}

/// A member of a statically configured cluster
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticMember {
    /// Node identifier
    pub id: String,
    /// Router endpoint address ("host:port")
    pub addr: String,
}

/// Cluster configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Membership mode
    pub mode: MembershipMode,

    /// Node identifier (auto-generated from hostname if not set)
    pub node_id: Option<String>,

    /// Cluster name; gossip only joins nodes with the same name
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Members for static mode. Empty means a single-node cluster.
    #[serde(default)]
    pub members: Vec<StaticMember>,

    /// Address for gossip protocol (chitchat) to bind to
    /// Default: 0.0.0.0:7946
    #[serde(default = "default_gossip_addr")]
    pub gossip_addr: SocketAddr,

    /// Advertise address for gossip protocol (what peers use to reach us)
    /// If not set, resolved from hostname or falls back to gossip_addr
    pub gossip_advertise_addr: Option<SocketAddr>,

    /// Seed nodes for cluster discovery
    /// Format: "host:port" (gossip port)
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Gossip interval in seconds
    /// Default: 1
    #[serde(default = "default_gossip_interval")]
    pub gossip_interval: u64,

    /// Dead node grace period in seconds before removal
    /// Default: 30
    #[serde(default = "default_dead_node_grace_period")]
    pub dead_node_grace_period: u64,
}

fn default_cluster_id() -> String {
    "vibemesh".to_string()
}

fn default_gossip_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7946))
}

fn default_gossip_interval() -> u64 {
    1
}

fn default_dead_node_grace_period() -> u64 {
    30
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: MembershipMode::default(),
            node_id: None,
            cluster_id: default_cluster_id(),
            members: Vec::new(),
            gossip_addr: default_gossip_addr(),
            gossip_advertise_addr: None,
            seeds: Vec::new(),
            gossip_interval: default_gossip_interval(),
            dead_node_grace_period: default_dead_node_grace_period(),
        }
    }
}

impl ClusterConfig {
    /// Get the node ID, falling back to [`default_node_id`] if not set
    pub fn get_node_id(&self) -> String {
        self.node_id.clone().unwrap_or_else(|| default_node_id().to_string())
    }

    /// Get the gossip advertise address (what peers use to reach us)
    /// Priority: explicit config > resolved hostname > bind address
    pub fn get_gossip_advertise_addr(&self) -> SocketAddr {
        if let Some(addr) = self.gossip_advertise_addr {
            return addr;
        }

        if let Some(ip) = resolve_local_ip() {
            return SocketAddr::new(ip, self.gossip_addr.port());
        }

        self.gossip_addr
    }

    /// Get gossip interval as Duration
    pub fn gossip_interval_duration(&self) -> Duration {
        Duration::from_secs(self.gossip_interval)
    }

    /// Get dead node grace period as Duration
    pub fn dead_node_grace_period_duration(&self) -> Duration {
        Duration::from_secs(self.dead_node_grace_period)
    }
}

/// Node ID used when none is configured: the hostname, or a random ID if the
/// hostname is unavailable. Resolved once per process.
pub fn default_node_id() -> &'static str {
    static NODE_ID: OnceLock<String> = OnceLock::new();
    NODE_ID.get_or_init(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| format!("node-{}", rand_id()))
    })
}

/// Resolve the local machine's IP address by resolving the hostname
pub(crate) fn resolve_local_ip() -> Option<IpAddr> {
    let hostname = hostname::get().ok()?;
    let hostname_str = hostname.to_string_lossy();

    let addr_str = format!("{}:0", hostname_str);
    addr_str
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4()) // Prefer IPv4
        .map(|addr| addr.ip())
}

/// Generate a random ID for node identification
fn rand_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}", nanos & 0xFFFFFFFF)
}
