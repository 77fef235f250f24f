//! Test Support
//!
//! In-memory stand-ins for the cluster and transport so routers can be
//! exercised without gossip or real sockets:
//!
//! - [`FixedOwnerMapper`] pins topic ownership per host list
//! - [`FakeCluster`] hands out connectors whose sockets are in-memory pairs
//!   that deliver frames synchronously
//! - [`RecordingListener`] records subscription callbacks as strings

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::cluster::{ClusterConnector, ClusterMapper, ClusterSnapshot, HashRing, TopicPeer};
use crate::router::{Listener, Subscription, WireMessage};
use crate::socket::{
    Socket, SocketError, SocketId, SocketListener, SocketRef, ABNORMAL_CLOSURE, GOING_AWAY,
};

/// Close reason used when a host leaves a [`FakeCluster`]
pub const HOST_LEFT_REASON: &str = "host left the cluster";

/// Maps every topic to a chosen owner, keyed by the cluster's host list.
///
/// Host lists without a pinned owner fall back to the hash ring.
#[derive(Default)]
pub struct FixedOwnerMapper {
    owners: Mutex<AHashMap<Vec<String>, String>>,
    fallback: HashRing,
}

impl FixedOwnerMapper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `owner` own every topic while the cluster consists of `hosts`
    pub fn set_owner_for_host_list(&self, hosts: &[&str], owner: &str) {
        let mut key: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        key.sort();
        self.owners.lock().insert(key, owner.to_string());
    }
}

impl ClusterMapper for FixedOwnerMapper {
    fn topic_to_host(&self, snapshot: &ClusterSnapshot, topic: &str) -> String {
        match self.owners.lock().get(snapshot.hosts()) {
            Some(owner) => owner.clone(),
            None => self.fallback.topic_to_host(snapshot, topic),
        }
    }
}

/// A text frame sent over a [`FakeCluster`] socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub from: String,
    pub to: String,
    pub text: String,
}

impl Frame {
    pub fn message(&self) -> WireMessage {
        WireMessage::decode(&self.text)
    }
}

/// One end of an in-memory socket pair
pub struct MemorySocket {
    id: SocketId,
    me: Weak<MemorySocket>,
    local_host: String,
    remote_host: String,
    peer: Mutex<Weak<MemorySocket>>,
    listener: Mutex<Option<Arc<dyn SocketListener>>>,
    closed: AtomicBool,
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl MemorySocket {
    fn new(
        local_host: &str,
        remote_host: &str,
        listener: Option<Arc<dyn SocketListener>>,
        frames: Arc<Mutex<Vec<Frame>>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: SocketId::next(),
            me: me.clone(),
            local_host: local_host.to_string(),
            remote_host: remote_host.to_string(),
            peer: Mutex::new(Weak::new()),
            listener: Mutex::new(listener),
            closed: AtomicBool::new(false),
            frames,
        })
    }

    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `f` against this end's listener, outside of any lock
    fn notify(&self, f: impl FnOnce(&dyn SocketListener, &SocketRef)) {
        let listener = self.listener.lock().clone();
        if let (Some(listener), Some(me)) = (listener, self.me.upgrade()) {
            let socket: SocketRef = me;
            f(listener.as_ref(), &socket);
        }
    }

    fn peer(&self) -> Option<Arc<MemorySocket>> {
        self.peer.lock().upgrade()
    }
}

impl Socket for MemorySocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send(&self, text: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(peer) = self.peer() else {
            return false;
        };
        self.frames.lock().push(Frame {
            from: self.local_host.clone(),
            to: self.remote_host.clone(),
            text: text.to_string(),
        });
        peer.notify(|listener, socket| listener.on_message(socket, text));
        true
    }

    fn close(&self, code: u16, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(peer) = self.peer() {
            if !peer.closed.swap(true, Ordering::SeqCst) {
                peer.notify(|listener, socket| listener.on_closing(socket, code, reason));
            }
        }
        self.notify(|listener, socket| listener.on_closed(socket, code, reason));
        true
    }

    fn cancel(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(peer) = self.peer() {
            if !peer.closed.swap(true, Ordering::SeqCst) {
                peer.notify(|listener, socket| {
                    listener.on_closed(socket, ABNORMAL_CLOSURE, "connection ended")
                });
            }
        }
        self.notify(|listener, socket| listener.on_failure(socket, &SocketError::Cancelled));
    }
}

#[derive(Default)]
struct ClusterState {
    members: BTreeMap<String, Arc<dyn TopicPeer>>,
    /// Every socket end ever opened, in creation order
    sockets: Vec<Arc<MemorySocket>>,
    connections: usize,
}

/// An in-memory cluster.
///
/// Joining or leaving reports the new membership to every member. Leaving
/// closes all of the host's sockets with [`GOING_AWAY`].
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector that joins this cluster as `host`
    pub fn connector(&self, host: &str) -> Arc<dyn ClusterConnector> {
        Arc::new(FakeClusterConnector {
            host: host.to_string(),
            cluster: self.clone(),
        })
    }

    /// Current member hosts, sorted
    pub fn members(&self) -> Vec<String> {
        self.state.lock().members.keys().cloned().collect()
    }

    /// Number of socket pairs opened so far
    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections
    }

    /// Socket ends owned by `host` that are still open
    pub fn open_sockets(&self, host: &str) -> usize {
        self.state
            .lock()
            .sockets
            .iter()
            .filter(|s| s.local_host == host && !s.is_closed())
            .count()
    }

    /// Every frame sent so far
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Frames sent from `from` to `to`
    pub fn frames_between(&self, from: &str, to: &str) -> Vec<Frame> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.from == from && f.to == to)
            .cloned()
            .collect()
    }

    fn join(&self, host: &str, peer: Arc<dyn TopicPeer>) {
        self.state.lock().members.insert(host.to_string(), peer);
        self.broadcast();
    }

    fn leave(&self, host: &str) {
        let sockets: Vec<Arc<MemorySocket>> = {
            let mut state = self.state.lock();
            state.members.remove(host);
            state
                .sockets
                .iter()
                .filter(|s| s.local_host == host)
                .cloned()
                .collect()
        };
        for socket in sockets {
            socket.close(GOING_AWAY, HOST_LEFT_REASON);
        }
        self.broadcast();
    }

    fn broadcast(&self) {
        let members: Vec<(String, Arc<dyn TopicPeer>)> = self
            .state
            .lock()
            .members
            .iter()
            .map(|(host, peer)| (host.clone(), peer.clone()))
            .collect();
        let hosts: Vec<String> = members.iter().map(|(host, _)| host.clone()).collect();
        for (host, peer) in members {
            peer.cluster_changed(ClusterSnapshot::new(hosts.clone(), host));
        }
    }

    fn connect(&self, from: &str, to: &str, listener: Arc<dyn SocketListener>) -> SocketRef {
        let target = self.state.lock().members.get(to).cloned();

        let client = MemorySocket::new(from, to, Some(listener.clone()), self.frames.clone());
        let Some(target) = target else {
            client.closed.store(true, Ordering::SeqCst);
            let socket: SocketRef = client;
            listener.on_failure(
                &socket,
                &SocketError::Connect(format!("{} is not a cluster member", to)),
            );
            return socket;
        };

        let server = MemorySocket::new(to, from, None, self.frames.clone());
        *client.peer.lock() = Arc::downgrade(&server);
        *server.peer.lock() = Arc::downgrade(&client);
        let server_listener = target.accept_websocket(server.clone());
        *server.listener.lock() = Some(server_listener);

        let mut state = self.state.lock();
        state.connections += 1;
        state.sockets.push(client.clone());
        state.sockets.push(server);
        client
    }
}

struct FakeClusterConnector {
    host: String,
    cluster: FakeCluster,
}

impl ClusterConnector for FakeClusterConnector {
    fn join_cluster(&self, peer: Arc<dyn TopicPeer>) {
        self.cluster.join(&self.host, peer);
    }

    fn leave_cluster(&self, _peer: &dyn TopicPeer) {
        self.cluster.leave(&self.host);
    }

    fn connect_socket(&self, host: &str, listener: Arc<dyn SocketListener>) -> SocketRef {
        self.cluster.connect(&self.host, host, listener)
    }
}

/// Records subscription callbacks as `"<topic>: open"`, `"<topic>: <event>"`
/// and `"<topic>: close"`
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Wait until at least `count` events were recorded or `timeout` passes,
    /// then return everything recorded
    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.events.lock().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl Listener<String> for RecordingListener {
    fn on_open(&self, subscription: &Subscription<String>) {
        self.record(format!("{}: open", subscription.topic().name()));
    }

    fn on_event(&self, subscription: &Subscription<String>, event: String) {
        self.record(format!("{}: {}", subscription.topic().name(), event));
    }

    fn on_close(&self, subscription: &Subscription<String>) {
        self.record(format!("{}: close", subscription.topic().name()));
    }
}
