//! Consistent Hashing
//!
//! Maps topic names onto the host that owns them. Every host contributes a
//! fixed number of virtual points to a ring; a topic belongs to the host whose
//! point has the smallest clockwise distance to the topic's own position.
//!
//! Adding or removing one host only moves the topics that land next to that
//! host's points, roughly `1 / hosts` of the total.

use std::fmt::Write;

use twox_hash::XxHash32;

use super::ClusterSnapshot;

/// Default number of virtual points per host
pub const DEFAULT_VIRTUAL_POINTS: u32 = 16;

/// Default number of positions on the ring
pub const DEFAULT_RING_SIZE: u32 = 65536;

/// Resolves which host owns a topic for a given membership
pub trait ClusterMapper: Send + Sync {
    /// Return the owning host of `topic`.
    ///
    /// # Panics
    ///
    /// Panics if `snapshot` has no hosts. A node that has received a snapshot
    /// is always a member of it, so this never happens while routing.
    fn topic_to_host(&self, snapshot: &ClusterSnapshot, topic: &str) -> String;
}

/// Consistent hash ring with virtual points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRing {
    virtual_points: u32,
    ring_size: u32,
}

impl HashRing {
    /// Create a ring.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    pub fn new(virtual_points: u32, ring_size: u32) -> Self {
        assert!(virtual_points > 0, "virtual_points must be positive");
        assert!(ring_size > 0, "ring_size must be positive");
        Self {
            virtual_points,
            ring_size,
        }
    }

    pub fn virtual_points(&self) -> u32 {
        self.virtual_points
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    /// Position of a key on the ring
    fn point(&self, key: &str) -> u32 {
        XxHash32::oneshot(0, key.as_bytes()) % self.ring_size
    }

    /// Distance travelled clockwise from `from` to reach `to`
    fn clockwise_distance(&self, from: u32, to: u32) -> u32 {
        let size = u64::from(self.ring_size);
        ((u64::from(to) + size - u64::from(from)) % size) as u32
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_POINTS, DEFAULT_RING_SIZE)
    }
}

impl ClusterMapper for HashRing {
    fn topic_to_host(&self, snapshot: &ClusterSnapshot, topic: &str) -> String {
        assert!(
            !snapshot.is_empty(),
            "cannot map topic '{}' onto an empty cluster",
            topic
        );

        let topic_point = self.point(topic);
        let mut key = String::new();
        let mut owner = &snapshot.hosts()[0];
        let mut best = u32::MAX;

        // Hosts are sorted, so the first minimum wins identically on every node
        for host in snapshot.hosts() {
            for i in 0..self.virtual_points {
                key.clear();
                let _ = write!(key, "{} {}", host, i);
                let distance = self.clockwise_distance(self.point(&key), topic_point);
                if distance < best {
                    best = distance;
                    owner = host;
                }
            }
        }

        owner.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn hosts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("host-{}", i)).collect()
    }

    fn topics(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("topic/{}", i)).collect()
    }

    #[test]
    fn test_single_host_owns_everything() {
        let ring = HashRing::default();
        let snapshot = ClusterSnapshot::new(["only"], "only");
        for topic in topics(100) {
            assert_eq!(ring.topic_to_host(&snapshot, &topic), "only");
        }
    }

    #[test]
    fn test_deterministic_across_nodes() {
        let ring = HashRing::default();
        let seen_by_a = ClusterSnapshot::new(["a", "b", "c"], "a");
        let seen_by_c = ClusterSnapshot::new(["c", "b", "a"], "c");
        for topic in topics(500) {
            let owner = ring.topic_to_host(&seen_by_a, &topic);
            assert_eq!(owner, ring.topic_to_host(&seen_by_a, &topic));
            assert_eq!(owner, ring.topic_to_host(&seen_by_c, &topic));
        }
    }

    #[test]
    fn test_every_host_owns_something() {
        let ring = HashRing::default();
        let snapshot = ClusterSnapshot::new(hosts(4), "host-0");
        let mut counts: HashMap<String, usize> = HashMap::new();
        for topic in topics(2000) {
            *counts.entry(ring.topic_to_host(&snapshot, &topic)).or_default() += 1;
        }
        assert_eq!(counts.len(), 4, "distribution: {:?}", counts);
    }

    #[test]
    fn test_adding_a_host_moves_a_fraction() {
        let ring = HashRing::default();
        let before = ClusterSnapshot::new(hosts(5), "host-0");
        let after = ClusterSnapshot::new(hosts(6), "host-0");

        let all = topics(2000);
        let moved = all
            .iter()
            .filter(|t| ring.topic_to_host(&before, t) != ring.topic_to_host(&after, t))
            .count();

        // Expected around 1/6; anything close to a full remap is a regression
        assert!(moved > 0);
        assert!(moved < all.len() / 2, "{} of {} topics moved", moved, all.len());
    }

    #[test]
    fn test_clockwise_distance_wraps() {
        let ring = HashRing::new(1, 100);
        assert_eq!(ring.clockwise_distance(10, 15), 5);
        assert_eq!(ring.clockwise_distance(90, 5), 15);
        assert_eq!(ring.clockwise_distance(42, 42), 0);
    }

    #[test]
    #[should_panic(expected = "empty cluster")]
    fn test_empty_snapshot_panics() {
        let snapshot = ClusterSnapshot::new(Vec::<String>::new(), "a");
        HashRing::default().topic_to_host(&snapshot, "orders");
    }

    #[test]
    #[should_panic]
    fn test_zero_ring_size_rejected() {
        HashRing::new(16, 0);
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn owner_is_always_a_member(topic in "[a-z/]{1,24}", n in 1usize..8) {
                let snapshot = ClusterSnapshot::new(hosts(n), "host-0");
                let owner = HashRing::default().topic_to_host(&snapshot, &topic);
                prop_assert!(snapshot.contains(&owner));
            }

            #[test]
            fn moved_topics_go_to_the_new_host(topic in "[a-z0-9/]{1,24}", n in 1usize..8) {
                let ring = HashRing::default();
                let before = ClusterSnapshot::new(hosts(n), "host-0");
                let after = ClusterSnapshot::new(hosts(n + 1), "host-0");
                let old_owner = ring.topic_to_host(&before, &topic);
                let new_owner = ring.topic_to_host(&after, &topic);
                if old_owner != new_owner {
                    prop_assert_eq!(new_owner, format!("host-{}", n));
                }
            }
        }
    }
}
