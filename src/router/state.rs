//! Router State
//!
//! All mutable router state lives here and is only touched by the drain
//! loop. Nothing in this module blocks: socket sends are queued by the
//! transport and listener callbacks are handed to the subscriber dispatcher.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use tracing::{debug, trace};

use crate::cluster::{ClusterConnector, ClusterMapper, ClusterSnapshot, TopicPeer};
use crate::socket::{SocketListener, SocketRef, NORMAL_CLOSURE};

use super::action::Action;
use super::subscription::LocalSubscriber;
use super::wire::WireMessage;

/// Close reason sent to remote subscribers when a topic moves
pub const OWNER_CHANGED_REASON: &str = "the topic owner has changed";

/// Drain loop mode
enum Mode {
    /// No membership known yet; actions are held back in arrival order
    AwaitingSnapshot(VecDeque<Action>),
    /// Routing against the current membership
    Running(ClusterSnapshot),
}

/// Who owns a topic under the current snapshot
#[derive(Debug, PartialEq, Eq)]
enum Ownership {
    Local,
    Remote(String),
}

pub(crate) struct RouterState {
    mode: Mode,
    mapper: Arc<dyn ClusterMapper>,
    connector: Arc<dyn ClusterConnector>,
    /// Listener attached to every socket this router opens or accepts
    socket_listener: Arc<dyn SocketListener>,
    /// This router as seen by the connector
    topic_peer: Arc<dyn TopicPeer>,
    /// Subscriptions made on this node, by topic
    local_subscribers: AHashMap<String, Vec<LocalSubscriber>>,
    /// Peer sockets subscribed to topics this node owns, by topic
    remote_subscribers: AHashMap<String, Vec<SocketRef>>,
    /// Outbound socket per peer host
    host_to_socket: AHashMap<String, SocketRef>,
}

impl RouterState {
    pub(crate) fn new(
        mapper: Arc<dyn ClusterMapper>,
        connector: Arc<dyn ClusterConnector>,
        socket_listener: Arc<dyn SocketListener>,
        topic_peer: Arc<dyn TopicPeer>,
    ) -> Self {
        Self {
            mode: Mode::AwaitingSnapshot(VecDeque::new()),
            mapper,
            connector,
            socket_listener,
            topic_peer,
            local_subscribers: AHashMap::new(),
            remote_subscribers: AHashMap::new(),
            host_to_socket: AHashMap::new(),
        }
    }

    /// Whether a cluster snapshot has been installed
    #[cfg(test)]
    pub(crate) fn has_cluster_snapshot(&self) -> bool {
        matches!(self.mode, Mode::Running(_))
    }

    /// Apply one action.
    ///
    /// Before the first snapshot arrives actions are buffered; the first
    /// `ClusterChanged` installs the snapshot and replays the buffer in order.
    pub(crate) fn apply(&mut self, action: Action) {
        match &mut self.mode {
            Mode::AwaitingSnapshot(pending) => match action {
                Action::ClusterChanged(snapshot) => {
                    debug!("Router: first cluster snapshot {}", snapshot);
                    let pending = std::mem::take(pending);
                    self.mode = Mode::Running(snapshot);
                    for action in pending {
                        self.handle(action);
                    }
                }
                action => {
                    trace!("Router: holding {} until a cluster snapshot arrives", action.type_name());
                    pending.push_back(action);
                }
            },
            Mode::Running(_) => self.handle(action),
        }
    }

    /// Peer sockets subscribed to `topic` on this node
    #[cfg(test)]
    pub(crate) fn remote_subscriber_count(&self, topic: &str) -> usize {
        self.remote_subscribers.get(topic).map_or(0, Vec::len)
    }

    fn handle(&mut self, action: Action) {
        debug!("Router: handling {:?}", action);

        match action {
            Action::LeaveCluster => self.handle_leave_cluster(),
            Action::ClusterChanged(snapshot) => self.handle_cluster_changed(snapshot),
            Action::OnMessage { socket, text } => self.handle_on_message(socket, &text),
            Action::Subscribe(subscriber) => self.handle_subscribe(subscriber),
            Action::Publish { topic, payload } => self.handle_publish(topic, payload),
            Action::CancelSubscription(subscriber) => self.handle_cancel_subscription(subscriber),
            Action::ClosedWebSocket(socket) => self.handle_closed_websocket(socket),
        }

        trace!(
            "Router state: local_subscribers={:?} remote_subscribers={:?} host_to_socket={:?}",
            self.local_subscribers,
            self.remote_subscribers,
            self.host_to_socket.keys().collect::<Vec<_>>()
        );
    }

    fn snapshot(&self) -> &ClusterSnapshot {
        match &self.mode {
            Mode::Running(snapshot) => snapshot,
            Mode::AwaitingSnapshot(_) => {
                unreachable!("actions are only handled once a cluster snapshot is installed")
            }
        }
    }

    fn owner(&self, topic: &str) -> Ownership {
        let snapshot = self.snapshot();
        let host = self.mapper.topic_to_host(snapshot, topic);
        if host == snapshot.self_host() {
            Ownership::Local
        } else {
            Ownership::Remote(host)
        }
    }

    fn handle_cancel_subscription(&mut self, subscriber: LocalSubscriber) {
        let topic = subscriber.topic();

        // Evicted subscribers were already removed and their owner told
        let removed_last = match self.local_subscribers.get_mut(topic) {
            Some(subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|s| s.id() != subscriber.id());
                subscribers.len() < before && subscribers.is_empty()
            }
            None => false,
        };

        if removed_last {
            self.local_subscribers.remove(topic);
            if let Ownership::Remote(owner) = self.owner(topic) {
                self.send_to_host(
                    &owner,
                    &WireMessage::Unsubscribe {
                        topic: topic.to_string(),
                    },
                );
            }
        }

        subscriber.on_close();
    }

    fn handle_publish(&mut self, topic: String, payload: String) {
        match self.owner(&topic) {
            Ownership::Remote(owner) => {
                self.send_to_host(
                    &owner,
                    &WireMessage::Event {
                        topic,
                        message: payload,
                    },
                );
            }
            Ownership::Local => {
                let event = WireMessage::Event {
                    topic: topic.clone(),
                    message: payload.clone(),
                };
                if let Some(sockets) = self.remote_subscribers.get(&topic) {
                    if let Ok(text) = event.encode() {
                        for socket in sockets {
                            socket.send(&text);
                        }
                    }
                }
                if let Some(subscribers) = self.local_subscribers.get(&topic) {
                    for subscriber in subscribers {
                        subscriber.on_event(&payload);
                    }
                }
            }
        }
    }

    fn handle_subscribe(&mut self, mut subscriber: LocalSubscriber) {
        let topic = subscriber.topic().to_string();

        match self.owner(&topic) {
            Ownership::Local => {
                subscriber.on_open();
                subscriber.open = true;
            }
            Ownership::Remote(owner) => {
                // on_open waits for the owner's ack
                self.send_to_host(
                    &owner,
                    &WireMessage::Subscribe {
                        topic: topic.clone(),
                    },
                );
            }
        }

        let subscribers = self.local_subscribers.entry(topic).or_default();
        if !subscribers.iter().any(|s| s.id() == subscriber.id()) {
            subscribers.push(subscriber);
        }
    }

    fn handle_on_message(&mut self, socket: SocketRef, text: &str) {
        let message = WireMessage::decode(text);
        debug!("Router: {} message on {:?}", message.type_name(), socket);

        match message {
            WireMessage::Event { topic, message } => {
                if let Some(subscribers) = self.local_subscribers.get(&topic) {
                    for subscriber in subscribers {
                        subscriber.on_event(&message);
                    }
                }
                if let Some(sockets) = self.remote_subscribers.get(&topic) {
                    for remote in sockets {
                        remote.send(text);
                    }
                }
            }
            WireMessage::Subscribe { topic } => {
                let sockets = self.remote_subscribers.entry(topic.clone()).or_default();
                if !sockets.iter().any(|s| s.id() == socket.id()) {
                    sockets.push(socket.clone());
                }
                if let Ok(ack) = (WireMessage::Ack { topic }).encode() {
                    socket.send(&ack);
                }
            }
            WireMessage::Ack { topic } => {
                if let Some(subscribers) = self.local_subscribers.get_mut(&topic) {
                    for subscriber in subscribers.iter_mut().filter(|s| !s.open) {
                        subscriber.on_open();
                        subscriber.open = true;
                    }
                }
            }
            WireMessage::Unsubscribe { topic } => {
                if let Some(sockets) = self.remote_subscribers.get_mut(&topic) {
                    sockets.retain(|s| s.id() != socket.id());
                    if sockets.is_empty() {
                        self.remote_subscribers.remove(&topic);
                    }
                }
            }
            WireMessage::Unknown => {
                debug!("Router: ignoring unrecognized message: {}", text);
            }
        }
    }

    fn handle_cluster_changed(&mut self, new_snapshot: ClusterSnapshot) {
        let old_snapshot = self.snapshot().clone();
        debug!("Router: cluster changed {} -> {}", old_snapshot, new_snapshot);

        let topics: AHashSet<String> = self
            .remote_subscribers
            .keys()
            .chain(self.local_subscribers.keys())
            .cloned()
            .collect();

        for topic in topics {
            let old_owner = self.mapper.topic_to_host(&old_snapshot, &topic);
            let new_owner = self.mapper.topic_to_host(&new_snapshot, &topic);
            if old_owner == new_owner {
                continue;
            }

            debug!(
                "Router: topic '{}' moved from {} to {}",
                topic, old_owner, new_owner
            );

            if let Some(subscribers) = self.local_subscribers.remove(&topic) {
                for subscriber in subscribers {
                    subscriber.cancel();
                }
            }
            if let Some(sockets) = self.remote_subscribers.remove(&topic) {
                for socket in sockets {
                    socket.close(NORMAL_CLOSURE, OWNER_CHANGED_REASON);
                }
            }
        }

        self.mode = Mode::Running(new_snapshot);
    }

    fn handle_closed_websocket(&mut self, socket: SocketRef) {
        let id = socket.id();

        // The peer behind this socket can no longer receive relayed events
        self.remote_subscribers.retain(|_, sockets| {
            sockets.retain(|s| s.id() != id);
            !sockets.is_empty()
        });

        let Some(host) = self
            .host_to_socket
            .iter()
            .find(|(_, s)| s.id() == id)
            .map(|(host, _)| host.clone())
        else {
            return;
        };
        self.host_to_socket.remove(&host);
        debug!("Router: lost socket to {}", host);

        let orphaned: Vec<String> = self
            .local_subscribers
            .keys()
            .filter(|topic| self.mapper.topic_to_host(self.snapshot(), topic) == host)
            .cloned()
            .collect();

        for topic in orphaned {
            if let Some(subscribers) = self.local_subscribers.remove(&topic) {
                for subscriber in subscribers {
                    subscriber.on_close();
                }
            }
        }
    }

    fn handle_leave_cluster(&mut self) {
        debug!("Router: leaving cluster");
        self.connector.leave_cluster(self.topic_peer.as_ref());
        for (_, subscribers) in self.local_subscribers.drain() {
            for subscriber in subscribers {
                subscriber.on_close();
            }
        }
    }

    fn send_to_host(&mut self, host: &str, message: &WireMessage) {
        if let Ok(text) = message.encode() {
            self.socket_for(host).send(&text);
        }
    }

    /// Cached outbound socket to `host`, connecting on first use
    fn socket_for(&mut self, host: &str) -> SocketRef {
        if let Some(socket) = self.host_to_socket.get(host) {
            return socket.clone();
        }

        debug!("Router: connecting to {}", host);
        let socket = self
            .connector
            .connect_socket(host, self.socket_listener.clone());
        self.host_to_socket.insert(host.to_string(), socket.clone());
        socket
    }
}
