//! The [`Ring`] accessor trait and the [`StaticRing`] snapshot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use petrel_types::Device;
use tracing::debug;

/// Read-only view of a placement ring.
///
/// Implementations are immutable snapshots: safe for concurrent reads with
/// no locking, and identical keys always map to identical partitions.
pub trait Ring: Send + Sync {
    /// Number of primary copies per partition.
    fn replica_count(&self) -> usize;

    /// How many high bits of the key hash select the partition.
    fn partition_bit_count(&self) -> u32;

    /// Partition for an (account, container, object) key. Container and
    /// object may be empty for account/container rings.
    fn partition(&self, account: &str, container: &str, object: &str) -> u64;

    /// Partition for a precomputed 32-bit hash prefix (the first 8 hex
    /// characters of an on-disk object hash).
    fn partition_for_hash(&self, hash_prefix: u32) -> u64 {
        (hash_prefix as u64) >> (32 - self.partition_bit_count())
    }

    /// The ordered primary devices for a partition. Exactly
    /// [`replica_count`](Ring::replica_count) entries when the ring has at
    /// least that many devices.
    fn primaries(&self, partition: u64) -> Vec<Device>;

    /// Lazy iterator over handoff devices for a partition, disjoint from
    /// the primaries. Safe to share between concurrent workers.
    fn handoffs(&self, partition: u64) -> Handoffs;

    /// Every device in the ring.
    fn devices(&self) -> Vec<Device>;
}

/// Shared, lazily-drawn handoff device stream.
///
/// Fan-out workers pull from the same `Handoffs` concurrently, so the
/// underlying iterator sits behind a mutex. Draws are cheap in-memory moves;
/// the lock is never held across I/O.
#[derive(Clone)]
pub struct Handoffs {
    inner: Arc<Mutex<HandoffState>>,
}

struct HandoffState {
    /// Devices to serve before consulting `rest` (device-limit leftovers).
    front: VecDeque<Device>,
    rest: Box<dyn Iterator<Item = Device> + Send>,
    /// Remaining draws; `None` means unlimited.
    limit: Option<usize>,
}

impl Handoffs {
    /// Wrap an iterator of handoff devices.
    pub fn new(rest: impl Iterator<Item = Device> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandoffState {
                front: VecDeque::new(),
                rest: Box::new(rest),
                limit: None,
            })),
        }
    }

    /// An empty handoff stream.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// A capped stream that serves `front` first, then `rest`, for at most
    /// `limit` draws in total.
    ///
    /// Used by device-limited dispatch: primaries beyond the device limit
    /// become the leading handoffs, and the cap keeps a failing partition
    /// from walking the whole cluster.
    pub fn with_front(front: Vec<Device>, rest: Handoffs, limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandoffState {
                front: front.into(),
                rest: Box::new(HandoffIter { inner: rest }),
                limit: Some(limit),
            })),
        }
    }

    /// Draw the next handoff device, if any.
    pub fn next(&self) -> Option<Device> {
        let mut state = self.inner.lock().expect("handoff lock poisoned");
        if let Some(limit) = &mut state.limit {
            if *limit == 0 {
                return None;
            }
            *limit -= 1;
        }
        if let Some(dev) = state.front.pop_front() {
            return Some(dev);
        }
        state.rest.next()
    }
}

/// Adapter so one `Handoffs` can feed another as a plain iterator.
struct HandoffIter {
    inner: Handoffs,
}

impl Iterator for HandoffIter {
    type Item = Device;

    fn next(&mut self) -> Option<Device> {
        self.inner.next()
    }
}

/// An immutable ring snapshot over a fixed device set.
///
/// Placement walks the device list from a partition-derived start offset:
/// the first R distinct devices are primaries, the remainder (in walk order)
/// are handoffs. Deterministic for a given device list and partition.
#[derive(Clone)]
pub struct StaticRing {
    devices: Vec<Device>,
    replicas: usize,
    partition_bits: u32,
    hash_path_prefix: String,
    hash_path_suffix: String,
}

impl StaticRing {
    /// Build a ring snapshot.
    ///
    /// `partition_bits` must be in 1..=32. The device order is significant:
    /// it fixes the placement walk.
    pub fn new(
        devices: Vec<Device>,
        replicas: usize,
        partition_bits: u32,
        hash_path_prefix: &str,
        hash_path_suffix: &str,
    ) -> Self {
        debug!(
            devices = devices.len(),
            replicas, partition_bits, "built static ring"
        );
        Self {
            devices,
            replicas,
            partition_bits,
            hash_path_prefix: hash_path_prefix.to_string(),
            hash_path_suffix: hash_path_suffix.to_string(),
        }
    }

    fn walk_start(&self, partition: u64) -> usize {
        if self.devices.is_empty() {
            0
        } else {
            (partition % self.devices.len() as u64) as usize
        }
    }
}

impl Ring for StaticRing {
    fn replica_count(&self) -> usize {
        self.replicas
    }

    fn partition_bit_count(&self) -> u32 {
        self.partition_bits
    }

    fn partition(&self, account: &str, container: &str, object: &str) -> u64 {
        let prefix = crate::hash_prefix(
            &self.hash_path_prefix,
            account,
            container,
            object,
            &self.hash_path_suffix,
        );
        self.partition_for_hash(prefix)
    }

    fn primaries(&self, partition: u64) -> Vec<Device> {
        let n = self.devices.len();
        let count = self.replicas.min(n);
        let start = self.walk_start(partition);
        (0..count)
            .map(|i| self.devices[(start + i) % n].clone())
            .collect()
    }

    fn handoffs(&self, partition: u64) -> Handoffs {
        let n = self.devices.len();
        let count = self.replicas.min(n);
        let start = self.walk_start(partition);
        let tail: Vec<Device> = (count..n)
            .map(|i| self.devices[(start + i) % n].clone())
            .collect();
        Handoffs::new(tail.into_iter())
    }

    fn devices(&self) -> Vec<Device> {
        self.devices.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: u64) -> Device {
        Device {
            id,
            scheme: "http".to_string(),
            host: format!("10.0.0.{id}"),
            port: 6000,
            device: format!("sd{id}"),
        }
    }

    fn ring(n: u64, replicas: usize) -> StaticRing {
        StaticRing::new((0..n).map(device).collect(), replicas, 16, "pfx", "sfx")
    }

    #[test]
    fn test_partition_deterministic() {
        let r = ring(8, 3);
        let p1 = r.partition("AUTH_a", "c", "o");
        let p2 = r.partition("AUTH_a", "c", "o");
        assert_eq!(p1, p2, "same key must produce same partition");
        assert!(p1 < (1 << 16));
    }

    #[test]
    fn test_partition_for_hash_agrees_with_key_partition() {
        let r = ring(8, 3);
        let hash = crate::object_hash("pfx", "AUTH_a", "c", "o", "sfx");
        let prefix = u32::from_str_radix(&hash[..8], 16).unwrap();
        assert_eq!(r.partition_for_hash(prefix), r.partition("AUTH_a", "c", "o"));
    }

    #[test]
    fn test_primaries_exactly_replica_count_and_distinct() {
        let r = ring(8, 3);
        for partition in 0..64 {
            let primaries = r.primaries(partition);
            assert_eq!(primaries.len(), 3);
            let mut ids: Vec<u64> = primaries.iter().map(|d| d.id).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), 3, "primaries must be distinct");
        }
    }

    #[test]
    fn test_handoffs_disjoint_and_cover_rest() {
        let r = ring(8, 3);
        let partition = r.partition("AUTH_a", "c", "o");
        let primary_ids: Vec<u64> = r.primaries(partition).iter().map(|d| d.id).collect();

        let handoffs = r.handoffs(partition);
        let mut handoff_ids = Vec::new();
        while let Some(dev) = handoffs.next() {
            assert!(
                !primary_ids.contains(&dev.id),
                "handoff {} is also a primary",
                dev.id
            );
            handoff_ids.push(dev.id);
        }
        assert_eq!(handoff_ids.len(), 5, "handoffs must cover the remainder");
    }

    #[test]
    fn test_handoffs_shared_draws_are_disjoint() {
        let r = ring(8, 3);
        let handoffs = r.handoffs(0);
        let clone = handoffs.clone();
        let a = handoffs.next().unwrap();
        let b = clone.next().unwrap();
        assert_ne!(a.id, b.id, "shared draws must not repeat a device");
    }

    #[test]
    fn test_handoffs_with_front_serves_front_then_rest() {
        let r = ring(8, 4);
        let mut primaries = r.primaries(0);
        let leftover = primaries.split_off(2);
        let leftover_ids: Vec<u64> = leftover.iter().map(|d| d.id).collect();

        let limited = Handoffs::with_front(leftover, r.handoffs(0), 3);
        assert_eq!(limited.next().unwrap().id, leftover_ids[0]);
        assert_eq!(limited.next().unwrap().id, leftover_ids[1]);
        assert!(limited.next().is_some(), "third draw comes from the rest");
        assert!(limited.next().is_none(), "limit caps total draws");
    }

    #[test]
    fn test_replica_count_exceeds_devices() {
        let r = ring(2, 5);
        let primaries = r.primaries(0);
        assert_eq!(primaries.len(), 2, "should return all devices, not panic");
        assert!(r.handoffs(0).next().is_none());
    }

    #[test]
    fn test_ec_ring_replica_count_is_k_plus_m() {
        // An EC ring is just a ring whose replica count is k+m.
        let r = ring(12, 10);
        assert_eq!(r.replica_count(), 10);
        assert_eq!(r.primaries(42).len(), 10);
    }
}
