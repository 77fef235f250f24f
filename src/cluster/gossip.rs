//! Gossip Membership
//!
//! Discovers routers through chitchat. Each node publishes the address of
//! its router endpoint in gossip state; a watcher polls the live node set
//! and reports a new [`ClusterSnapshot`] whenever it changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use chitchat::transport::UdpTransport;
use chitchat::{spawn_chitchat, Chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::socket::{SocketListener, SocketRef, WebSocket};

use super::{ClusterConnector, ClusterError, ClusterSnapshot, TopicPeer};

/// Chitchat state key holding a node's router address
const KEY_ROUTER_ADDR: &str = "router_addr";

/// Connector backed by chitchat gossip
pub struct GossipClusterConnector {
    /// Our node ID
    node_id: String,
    /// Our router endpoint address
    router_addr: String,
    /// Router endpoint path on every node
    path: String,
    connect_timeout: Duration,
    gossip_interval: Duration,
    /// Dropped on leave, which stops gossip
    chitchat: Mutex<Option<ChitchatHandle>>,
    /// Router address per live node
    addresses: Arc<RwLock<AHashMap<String, String>>>,
    /// When the watcher last observed membership
    last_update: Arc<RwLock<Option<Instant>>>,
    /// Stops the watcher loop
    stop_watcher: Mutex<Option<oneshot::Sender<()>>>,
}

impl GossipClusterConnector {
    /// Start gossiping.
    ///
    /// `router_addr` is the "host:port" other nodes dial to reach this
    /// node's router endpoint.
    pub async fn start(
        config: &ClusterConfig,
        router_addr: String,
        path: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ClusterError> {
        let node_id = config.get_node_id();
        let gossip_advertise_addr = config.get_gossip_advertise_addr();

        info!(
            "Starting gossip for node {} (gossip_advertise={}, router={})",
            node_id, gossip_advertise_addr, router_addr
        );

        let chitchat_id = ChitchatId::new(node_id.clone(), 0, gossip_advertise_addr);

        let failure_detector_config = FailureDetectorConfig {
            phi_threshold: 8.0,
            initial_interval: config.gossip_interval_duration(),
            ..Default::default()
        };

        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: config.cluster_id.clone(),
            gossip_interval: config.gossip_interval_duration(),
            listen_addr: config.gossip_addr,
            seed_nodes: config.seeds.clone(),
            failure_detector_config,
            marked_for_deletion_grace_period: config.dead_node_grace_period_duration(),
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let initial_kvs = vec![(KEY_ROUTER_ADDR.to_string(), router_addr.clone())];

        let handle = spawn_chitchat(chitchat_config, initial_kvs, &UdpTransport)
            .await
            .map_err(|e| ClusterError::Gossip(e.to_string()))?;

        let addresses = routable_members(&node_id, &router_addr, Vec::new());

        Ok(Self {
            node_id,
            router_addr,
            path: path.into(),
            connect_timeout,
            gossip_interval: config.gossip_interval_duration(),
            chitchat: Mutex::new(Some(handle)),
            addresses: Arc::new(RwLock::new(addresses)),
            last_update: Arc::new(RwLock::new(None)),
            stop_watcher: Mutex::new(None),
        })
    }

    /// Get our node ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Time since membership was last observed, or `None` before the first
    /// observation
    pub fn last_update(&self) -> Option<Duration> {
        self.last_update.read().map(|at| at.elapsed())
    }

    /// Whether membership was observed within `max_age`
    pub fn is_healthy(&self, max_age: Duration) -> bool {
        self.last_update().is_some_and(|age| age <= max_age)
    }

    /// Read the live node set and their router addresses
    async fn observe(chitchat: &tokio::sync::Mutex<Chitchat>) -> Vec<(String, Option<String>)> {
        let cc = chitchat.lock().await;
        cc.live_nodes()
            .map(|id| {
                let addr = cc
                    .node_state(id)
                    .and_then(|state| state.get(KEY_ROUTER_ADDR))
                    .map(str::to_string);
                (id.node_id.clone(), addr)
            })
            .collect()
    }

    /// Poll gossip state and report membership changes to `peer`
    async fn watch(
        chitchat: Arc<tokio::sync::Mutex<Chitchat>>,
        node_id: String,
        router_addr: String,
        interval: Duration,
        addresses: Arc<RwLock<AHashMap<String, String>>>,
        last_update: Arc<RwLock<Option<Instant>>>,
        peer: Arc<dyn TopicPeer>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut reported: Option<ClusterSnapshot> = None;
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {}
            }

            let live = Self::observe(&chitchat).await;

            let routable = routable_members(&node_id, &router_addr, live);
            let hosts: Vec<String> = routable.keys().cloned().collect();
            *addresses.write() = routable;
            *last_update.write() = Some(Instant::now());

            let snapshot = ClusterSnapshot::new(hosts, node_id.clone());
            if reported.as_ref() != Some(&snapshot) {
                info!("Gossip: membership is now {}", snapshot);
                reported = Some(snapshot.clone());
                peer.cluster_changed(snapshot);
            }
        }

        debug!("Gossip watcher for {} stopped", node_id);
    }
}

/// Router address of every live node that has gossiped one, plus our own.
/// Departed nodes drop out because the map is rebuilt from `live`.
fn routable_members(
    node_id: &str,
    router_addr: &str,
    live: Vec<(String, Option<String>)>,
) -> AHashMap<String, String> {
    let mut addresses = AHashMap::new();
    for (id, addr) in live {
        match addr {
            Some(addr) => {
                addresses.insert(id, addr);
            }
            // Not routable until its address has gossiped
            None => debug!("Gossip: {} has no router address yet", id),
        }
    }
    addresses.insert(node_id.to_string(), router_addr.to_string());
    addresses
}

impl ClusterConnector for GossipClusterConnector {
    fn join_cluster(&self, peer: Arc<dyn TopicPeer>) {
        let Some(chitchat) = self.chitchat.lock().as_ref().map(|h| h.chitchat()) else {
            warn!("Gossip: cannot join after leaving");
            return;
        };

        let (tx, rx) = oneshot::channel();
        *self.stop_watcher.lock() = Some(tx);

        tokio::spawn(Self::watch(
            chitchat,
            self.node_id.clone(),
            self.router_addr.clone(),
            self.gossip_interval,
            self.addresses.clone(),
            self.last_update.clone(),
            peer,
            rx,
        ));
    }

    fn leave_cluster(&self, _peer: &dyn TopicPeer) {
        info!("Gossip: {} leaving cluster", self.node_id);
        if let Some(stop) = self.stop_watcher.lock().take() {
            let _ = stop.send(());
        }
        // Gossip stops when the handle is dropped
        self.chitchat.lock().take();
    }

    fn connect_socket(&self, host: &str, listener: Arc<dyn SocketListener>) -> SocketRef {
        let addr = self.addresses.read().get(host).cloned();
        match addr {
            Some(addr) => {
                let url = format!("ws://{}{}", addr, self.path);
                debug!("Gossip: connecting to {} at {}", host, url);
                WebSocket::connect(url, listener, self.connect_timeout)
            }
            None => {
                warn!("Gossip: no router address for {}", host);
                WebSocket::unreachable(
                    host.to_string(),
                    listener,
                    format!("no router address for {}", host),
                )
            }
        }
    }
}
