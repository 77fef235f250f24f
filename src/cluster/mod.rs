//! Cluster Module
//!
//! Membership and topic ownership for the router.
//!
//! # Architecture
//!
//! - **Membership**: a [`ClusterConnector`] reports [`ClusterSnapshot`]s,
//!   either from a fixed member list or from gossip (chitchat over UDP)
//! - **Ownership**: a [`ClusterMapper`] (the consistent [`HashRing`] in
//!   production) picks the one host that owns each topic
//! - **Transport**: routers reach each other over WebSockets opened by the
//!   connector
//!
//! # Usage
//!
//! ```toml
//! # vibemesh.toml
//! [cluster]
//! mode = "gossip"
//! gossip_addr = "0.0.0.0:7946"
//! seeds = ["node1:7946", "node2:7946"]
//! ```

mod connector;
mod gossip;
mod ring;
mod snapshot;
mod static_members;

pub use connector::{ClusterConnector, TopicPeer};
pub use gossip::GossipClusterConnector;
pub use ring::{ClusterMapper, HashRing, DEFAULT_RING_SIZE, DEFAULT_VIRTUAL_POINTS};
pub use snapshot::ClusterSnapshot;
pub use static_members::StaticClusterConnector;

use std::fmt;

// Re-export cluster config
pub use crate::config::ClusterConfig;

/// Error starting cluster components
#[derive(Debug)]
pub enum ClusterError {
    /// Gossip could not be started
    Gossip(String),
    /// A listener could not be bound
    Bind(std::io::Error),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::Gossip(msg) => write!(f, "Gossip error: {}", msg),
            ClusterError::Bind(e) => write!(f, "Bind error: {}", e),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::Bind(e)
    }
}
