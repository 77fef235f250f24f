//! vibemesh - clustered publish/subscribe event router
//!
//! Every topic is owned by exactly one node, chosen by consistent hashing
//! over the current cluster membership. Publishers and subscribers on any
//! node are routed through the owner over WebSockets, and subscriptions are
//! torn down whenever ownership moves.

pub mod cluster;
pub mod config;
pub mod node;
pub mod router;
pub mod server;
pub mod socket;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cluster::{
    ClusterConnector, ClusterMapper, ClusterSnapshot, GossipClusterConnector, HashRing,
    StaticClusterConnector, TopicPeer,
};
pub use config::Config;
pub use node::Node;
pub use router::{EventRouter, Json, Listener, Payload, Subscription, Topic, WireMessage};
pub use server::RouterServer;
pub use socket::{Socket, SocketListener, SocketRef, WebSocket};
