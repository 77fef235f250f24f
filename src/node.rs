//! Node
//!
//! Wires configuration into a running router: membership connector, event
//! router, and the WebSocket endpoint peers connect to.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cluster::{
    ClusterConnector, ClusterError, GossipClusterConnector, HashRing, StaticClusterConnector,
};
use crate::config::{Config, MembershipMode};
use crate::router::EventRouter;
use crate::server::RouterServer;

/// Time the router gets to close local subscriptions on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

enum Membership {
    Static(Arc<StaticClusterConnector>),
    Gossip(Arc<GossipClusterConnector>),
}

impl Membership {
    fn connector(&self) -> Arc<dyn ClusterConnector> {
        match self {
            Membership::Static(c) => c.clone(),
            Membership::Gossip(c) => c.clone(),
        }
    }
}

/// A running router node
pub struct Node {
    node_id: String,
    router: EventRouter,
    server: RouterServer,
    membership: Membership,
}

impl Node {
    /// Start a node from configuration and join the cluster
    pub async fn start(config: &Config) -> Result<Self, ClusterError> {
        let node_id = config.cluster.get_node_id();
        let router_cfg = &config.router;

        let membership = match config.cluster.mode {
            MembershipMode::Static => {
                Membership::Static(Arc::new(StaticClusterConnector::new(
                    node_id.clone(),
                    &config.cluster.members,
                    router_cfg.path.clone(),
                    router_cfg.connect_timeout,
                )))
            }
            MembershipMode::Gossip => {
                let connector = GossipClusterConnector::start(
                    &config.cluster,
                    router_cfg.get_advertise_addr(),
                    router_cfg.path.clone(),
                    router_cfg.connect_timeout,
                )
                .await?;
                Membership::Gossip(Arc::new(connector))
            }
        };

        let mapper = Arc::new(HashRing::new(router_cfg.virtual_points, router_cfg.ring_size));
        let router = EventRouter::new(mapper, membership.connector());

        let server =
            RouterServer::bind(router_cfg.bind, router_cfg.path.clone(), router.topic_peer())
                .await?;

        info!(
            "Node {} started ({:?} membership, endpoint {})",
            node_id,
            config.cluster.mode,
            server.local_addr()
        );

        router.join_cluster();

        Ok(Self {
            node_id,
            router,
            server,
            membership,
        })
    }

    /// Our node ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The event router of this node
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Address of the router endpoint
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    /// Time since gossip last observed membership. `None` for static
    /// membership or before the first observation.
    pub fn last_membership_update(&self) -> Option<Duration> {
        match &self.membership {
            Membership::Static(_) => None,
            Membership::Gossip(c) => c.last_update(),
        }
    }

    /// Whether membership is current. Static membership is always current;
    /// gossip must have observed the cluster within `max_age`.
    pub fn is_membership_healthy(&self, max_age: Duration) -> bool {
        match &self.membership {
            Membership::Static(_) => true,
            Membership::Gossip(c) => c.is_healthy(max_age),
        }
    }

    /// Leave the cluster and stop accepting peer connections
    pub async fn shutdown(self) {
        info!("Node {} shutting down", self.node_id);
        self.router.leave_cluster();
        self.server.shutdown();
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }
}
