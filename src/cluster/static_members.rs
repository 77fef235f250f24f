//! Static Membership
//!
//! A cluster whose members are fixed in configuration. Every node reports
//! the same snapshot once on join and never again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::StaticMember;
use crate::socket::{SocketListener, SocketRef, WebSocket};

use super::{ClusterConnector, ClusterSnapshot, TopicPeer};

/// Connector for a fixed member list
pub struct StaticClusterConnector {
    self_id: String,
    /// Member id to router address ("host:port")
    members: BTreeMap<String, String>,
    path: String,
    connect_timeout: Duration,
}

impl StaticClusterConnector {
    /// Create a connector for `members`.
    ///
    /// `self_id` is always part of the cluster; with no members this is a
    /// single-node cluster.
    pub fn new(
        self_id: impl Into<String>,
        members: &[StaticMember],
        path: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        let members = members
            .iter()
            .map(|m| (m.id.clone(), m.addr.clone()))
            .collect();
        Self {
            self_id: self_id.into(),
            members,
            path: path.into(),
            connect_timeout,
        }
    }

    /// The membership this connector reports
    pub fn snapshot(&self) -> ClusterSnapshot {
        let hosts: Vec<String> = self
            .members
            .keys()
            .cloned()
            .chain(std::iter::once(self.self_id.clone()))
            .collect();
        ClusterSnapshot::new(hosts, self.self_id.clone())
    }

    fn url_for(&self, addr: &str) -> String {
        format!("ws://{}{}", addr, self.path)
    }
}

impl ClusterConnector for StaticClusterConnector {
    fn join_cluster(&self, peer: Arc<dyn TopicPeer>) {
        let snapshot = self.snapshot();
        info!("Static cluster: joined as {} with {}", self.self_id, snapshot);
        peer.cluster_changed(snapshot);
    }

    fn leave_cluster(&self, _peer: &dyn TopicPeer) {
        info!("Static cluster: {} left", self.self_id);
    }

    fn connect_socket(&self, host: &str, listener: Arc<dyn SocketListener>) -> SocketRef {
        match self.members.get(host) {
            Some(addr) => {
                let url = self.url_for(addr);
                debug!("Static cluster: connecting to {} at {}", host, url);
                WebSocket::connect(url, listener, self.connect_timeout)
            }
            None => {
                warn!("Static cluster: no address for {}", host);
                WebSocket::unreachable(
                    host.to_string(),
                    listener,
                    format!("unknown cluster member {}", host),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::socket::SocketError;

    fn member(id: &str, addr: &str) -> StaticMember {
        StaticMember {
            id: id.to_string(),
            addr: addr.to_string(),
        }
    }

    #[derive(Default)]
    struct SnapshotRecorder {
        snapshots: Mutex<Vec<ClusterSnapshot>>,
    }

    impl TopicPeer for SnapshotRecorder {
        fn accept_websocket(&self, _socket: SocketRef) -> Arc<dyn SocketListener> {
            unreachable!("static connector never accepts sockets")
        }

        fn cluster_changed(&self, snapshot: ClusterSnapshot) {
            self.snapshots.lock().push(snapshot);
        }
    }

    #[derive(Default)]
    struct FailureRecorder {
        failures: Mutex<Vec<String>>,
    }

    impl SocketListener for FailureRecorder {
        fn on_message(&self, _socket: &SocketRef, _text: &str) {}
        fn on_closing(&self, _socket: &SocketRef, _code: u16, _reason: &str) {}
        fn on_closed(&self, _socket: &SocketRef, _code: u16, _reason: &str) {}
        fn on_failure(&self, _socket: &SocketRef, error: &SocketError) {
            self.failures.lock().push(error.to_string());
        }
    }

    #[test]
    fn test_snapshot_includes_self() {
        let connector = StaticClusterConnector::new(
            "b",
            &[member("a", "10.0.0.1:7947"), member("c", "10.0.0.3:7947")],
            "/eventrouter",
            Duration::from_secs(1),
        );
        let snapshot = connector.snapshot();
        assert_eq!(snapshot.hosts(), ["a", "b", "c"]);
        assert_eq!(snapshot.self_host(), "b");
    }

    #[test]
    fn test_no_members_is_single_node() {
        let connector =
            StaticClusterConnector::new("solo", &[], "/eventrouter", Duration::from_secs(1));
        assert_eq!(connector.snapshot().hosts(), ["solo"]);
    }

    #[test]
    fn test_join_reports_snapshot_once() {
        let connector = StaticClusterConnector::new(
            "a",
            &[member("a", "127.0.0.1:1"), member("b", "127.0.0.1:2")],
            "/eventrouter",
            Duration::from_secs(1),
        );
        let peer = Arc::new(SnapshotRecorder::default());
        connector.join_cluster(peer.clone());
        connector.leave_cluster(peer.as_ref());

        let snapshots = peer.snapshots.lock();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].hosts(), ["a", "b"]);
    }

    #[test]
    fn test_url_for() {
        let connector = StaticClusterConnector::new("a", &[], "/events", Duration::from_secs(1));
        assert_eq!(connector.url_for("node-2:7947"), "ws://node-2:7947/events");
    }

    #[tokio::test]
    async fn test_connect_unknown_host_fails_asynchronously() {
        let connector =
            StaticClusterConnector::new("a", &[], "/eventrouter", Duration::from_secs(1));
        let listener = Arc::new(FailureRecorder::default());
        let socket = connector.connect_socket("ghost", listener.clone());
        assert!(!socket.send("hello"));

        for _ in 0..100 {
            if !listener.failures.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let failures = listener.failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("ghost"));
    }
}
