//! Cluster Connector
//!
//! The boundary between the router and whatever discovers cluster members
//! and opens sockets to them.

use std::sync::Arc;

use crate::socket::{SocketListener, SocketRef};

use super::ClusterSnapshot;

/// A router as seen by its cluster connector
pub trait TopicPeer: Send + Sync {
    /// A remote router connected to this node. Returns the listener that
    /// handles the new socket's traffic.
    fn accept_websocket(&self, socket: SocketRef) -> Arc<dyn SocketListener>;

    /// Membership changed. The first call unblocks routing.
    fn cluster_changed(&self, snapshot: ClusterSnapshot);
}

/// Supplies membership and peer connections to a router
pub trait ClusterConnector: Send + Sync {
    /// Start reporting membership to `peer`. Must call
    /// [`TopicPeer::cluster_changed`] at least once after joining.
    fn join_cluster(&self, peer: Arc<dyn TopicPeer>);

    /// Stop reporting membership and release resources
    fn leave_cluster(&self, peer: &dyn TopicPeer);

    /// Open a socket to `host`'s router endpoint.
    ///
    /// Always returns a socket; a failed connection is reported later
    /// through `listener`.
    fn connect_socket(&self, host: &str, listener: Arc<dyn SocketListener>) -> SocketRef;
}
