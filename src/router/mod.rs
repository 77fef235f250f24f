//! Event Router
//!
//! The router is an actor: a single drain task owns all topic, subscription
//! and socket state and applies actions from an unbounded FIFO mailbox one at
//! a time. Callers, sockets and the cluster connector only ever enqueue.
//!
//! Listener callbacks are handed to a separate dispatcher task so that slow
//! application code never stalls the drain loop.
//!
//! ```text
//!   Topic::publish ─┐
//!   Topic::subscribe├─► mailbox ─► drain task ─► sockets (fire-and-forget)
//!   socket events  ─┤                    │
//!   cluster changes ┘                    └─► dispatcher task ─► Listener
//! ```

mod action;
mod state;
mod subscription;
mod wire;


pub use state::OWNER_CHANGED_REASON;
pub use subscription::{Json, Listener, Payload, PayloadError, Subscription, SubscriptionId, Topic};
pub use wire::WireMessage;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cluster::{ClusterConnector, ClusterMapper, ClusterSnapshot, TopicPeer};
use crate::socket::{SocketError, SocketListener, SocketRef};

use action::Action;
use state::RouterState;

/// Sending side of the router's action queue
#[derive(Clone)]
pub(crate) struct Mailbox {
    tx: mpsc::UnboundedSender<Action>,
}

impl Mailbox {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn enqueue(&self, action: Action) {
        if let Err(e) = self.tx.send(action) {
            debug!("Router stopped, dropping {}", e.0.type_name());
        }
    }
}

/// A listener callback waiting to run
pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// Sending side of the subscriber callback queue
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Callback>,
}

impl Dispatcher {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Callback>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn dispatch(&self, callback: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(callback)).is_err() {
            debug!("Subscriber dispatcher stopped, dropping callback");
        }
    }
}

/// Everything a topic handle needs to reach its router
#[derive(Clone)]
pub(crate) struct RouterHandle {
    pub(crate) mailbox: Mailbox,
    pub(crate) dispatcher: Dispatcher,
}

/// Turns socket callbacks into router actions
struct RouterSocketListener {
    mailbox: Mailbox,
}

impl SocketListener for RouterSocketListener {
    fn on_message(&self, socket: &SocketRef, text: &str) {
        self.mailbox.enqueue(Action::OnMessage {
            socket: socket.clone(),
            text: text.to_string(),
        });
    }

    fn on_closing(&self, socket: &SocketRef, _code: u16, _reason: &str) {
        self.mailbox.enqueue(Action::ClosedWebSocket(socket.clone()));
    }

    fn on_closed(&self, socket: &SocketRef, _code: u16, _reason: &str) {
        self.mailbox.enqueue(Action::ClosedWebSocket(socket.clone()));
    }

    fn on_failure(&self, socket: &SocketRef, error: &SocketError) {
        debug!("Router: socket {:?} failed: {}", socket, error);
        self.mailbox.enqueue(Action::ClosedWebSocket(socket.clone()));
    }
}

/// The router as seen by a [`ClusterConnector`]
struct RouterPeer {
    mailbox: Mailbox,
    socket_listener: Arc<dyn SocketListener>,
}

impl TopicPeer for RouterPeer {
    fn accept_websocket(&self, socket: SocketRef) -> Arc<dyn SocketListener> {
        debug!("Router: accepted socket {:?}", socket);
        self.socket_listener.clone()
    }

    fn cluster_changed(&self, snapshot: ClusterSnapshot) {
        self.mailbox.enqueue(Action::ClusterChanged(snapshot));
    }
}

/// The receiving halves of a router, before they are driven
pub(crate) struct RouterCore {
    pub(crate) state: RouterState,
    pub(crate) actions: mpsc::UnboundedReceiver<Action>,
    pub(crate) callbacks: mpsc::UnboundedReceiver<Callback>,
}

impl RouterCore {
    /// Drain the mailbox until every sender is gone
    async fn run_actions(mut state: RouterState, mut actions: mpsc::UnboundedReceiver<Action>) {
        while let Some(action) = actions.recv().await {
            state.apply(action);
        }
        debug!("Router drain loop stopped");
    }

    /// Run listener callbacks in the order they were produced
    async fn run_callbacks(mut callbacks: mpsc::UnboundedReceiver<Callback>) {
        while let Some(callback) = callbacks.recv().await {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!("Subscriber listener panicked");
            }
        }
    }

    fn spawn(self) -> (JoinHandle<()>, JoinHandle<()>) {
        let drain = tokio::spawn(Self::run_actions(self.state, self.actions));
        let dispatch = tokio::spawn(Self::run_callbacks(self.callbacks));
        (drain, dispatch)
    }
}

/// Clustered publish/subscribe router.
///
/// Must be created inside a Tokio runtime.
pub struct EventRouter {
    handle: RouterHandle,
    connector: Arc<dyn ClusterConnector>,
    peer: Arc<RouterPeer>,
    has_joined_cluster: AtomicBool,
    tasks: Option<(JoinHandle<()>, JoinHandle<()>)>,
}

impl EventRouter {
    /// Create a router and start its drain and dispatcher tasks.
    ///
    /// Nothing is routed until [`join_cluster`](Self::join_cluster) is called
    /// and the connector reports the first membership snapshot.
    pub fn new(mapper: Arc<dyn ClusterMapper>, connector: Arc<dyn ClusterConnector>) -> Self {
        let (mut router, core) = Self::unstarted(mapper, connector);
        router.tasks = Some(core.spawn());
        router
    }

    /// Create a router whose core is driven by the caller
    pub(crate) fn unstarted(
        mapper: Arc<dyn ClusterMapper>,
        connector: Arc<dyn ClusterConnector>,
    ) -> (Self, RouterCore) {
        let (mailbox, actions) = Mailbox::channel();
        let (dispatcher, callbacks) = Dispatcher::channel();

        let socket_listener: Arc<dyn SocketListener> = Arc::new(RouterSocketListener {
            mailbox: mailbox.clone(),
        });
        let peer = Arc::new(RouterPeer {
            mailbox: mailbox.clone(),
            socket_listener: socket_listener.clone(),
        });
        let state = RouterState::new(mapper, connector.clone(), socket_listener, peer.clone());

        let router = Self {
            handle: RouterHandle {
                mailbox,
                dispatcher,
            },
            connector,
            peer,
            has_joined_cluster: AtomicBool::new(false),
            tasks: None,
        };
        let core = RouterCore {
            state,
            actions,
            callbacks,
        };
        (router, core)
    }

    /// Join the cluster. Repeated calls are ignored.
    pub fn join_cluster(&self) {
        if self
            .has_joined_cluster
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Router: joining cluster");
            self.connector.join_cluster(self.topic_peer());
        }
    }

    /// Leave the cluster and close every local subscription.
    /// Ignored unless the router has joined.
    pub fn leave_cluster(&self) {
        if self
            .has_joined_cluster
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Router: leaving cluster");
            self.handle.mailbox.enqueue(Action::LeaveCluster);
        }
    }

    pub fn has_joined_cluster(&self) -> bool {
        self.has_joined_cluster.load(Ordering::SeqCst)
    }

    /// Handle through which the connector and the socket server reach this router
    pub fn topic_peer(&self) -> Arc<dyn TopicPeer> {
        self.peer.clone()
    }

    /// Get a handle to a topic
    pub fn topic<T: Payload>(&self, name: impl Into<String>) -> Topic<T> {
        let name: String = name.into();
        Topic::new(Arc::from(name), self.handle.clone())
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        if let Some((drain, dispatch)) = self.tasks.take() {
            drain.abort();
            dispatch.abort();
        }
    }
}
