//! Cluster Snapshot
//!
//! An immutable view of cluster membership as seen by one node.

use std::fmt;

/// Membership of the cluster at one point in time.
///
/// Hosts are kept sorted and deduplicated so that two nodes holding the same
/// membership always compare equal and iterate hosts in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterSnapshot {
    /// Host identifiers of every live member, sorted
    hosts: Vec<String>,
    /// Host identifier of the local node
    self_host: String,
}

impl ClusterSnapshot {
    /// Create a snapshot from a host list and the local host identifier
    pub fn new<I, S>(hosts: I, self_host: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
        hosts.sort();
        hosts.dedup();
        Self {
            hosts,
            self_host: self_host.into(),
        }
    }

    /// All member hosts in sorted order
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// The local host identifier
    pub fn self_host(&self) -> &str {
        &self.self_host
    }

    /// Check whether a host is a member
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.binary_search_by(|h| h.as_str().cmp(host)).is_ok()
    }

    /// Whether the local node is part of this membership
    pub fn has_joined(&self) -> bool {
        self.contains(&self.self_host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl fmt::Display for ClusterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] self={}", self.hosts.join(", "), self.self_host)
    }
}
