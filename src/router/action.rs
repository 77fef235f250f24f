//! Router Actions
//!
//! Every state transition of the router is expressed as an action and
//! applied by the drain loop, one at a time, in enqueue order.

use std::fmt;

use crate::cluster::ClusterSnapshot;
use crate::socket::SocketRef;

use super::subscription::LocalSubscriber;

pub(crate) enum Action {
    /// Text arrived on a socket
    OnMessage { socket: SocketRef, text: String },
    /// Cluster membership changed
    ClusterChanged(ClusterSnapshot),
    /// A local caller published on a topic
    Publish { topic: String, payload: String },
    /// A local caller subscribed to a topic
    Subscribe(LocalSubscriber),
    /// A subscription was cancelled by its owner or evicted
    CancelSubscription(LocalSubscriber),
    /// A socket closed or failed
    ClosedWebSocket(SocketRef),
    /// The node is leaving the cluster
    LeaveCluster,
}

impl Action {
    /// Get the action name for logging
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Action::OnMessage { .. } => "OnMessage",
            Action::ClusterChanged(_) => "ClusterChanged",
            Action::Publish { .. } => "Publish",
            Action::Subscribe(_) => "Subscribe",
            Action::CancelSubscription(_) => "CancelSubscription",
            Action::ClosedWebSocket(_) => "ClosedWebSocket",
            Action::LeaveCluster => "LeaveCluster",
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::OnMessage { socket, text } => write!(f, "OnMessage({:?}, {})", socket, text),
            Action::ClusterChanged(snapshot) => write!(f, "ClusterChanged({})", snapshot),
            Action::Publish { topic, payload } => write!(f, "Publish({}, {})", topic, payload),
            Action::Subscribe(sub) => write!(f, "Subscribe({:?})", sub),
            Action::CancelSubscription(sub) => write!(f, "CancelSubscription({:?})", sub),
            Action::ClosedWebSocket(socket) => write!(f, "ClosedWebSocket({:?})", socket),
            Action::LeaveCluster => write!(f, "LeaveCluster"),
        }
    }
}
