//! Shared types for the Petrel object-storage proxy.
//!
//! This crate defines the vocabulary the rest of the workspace shares:
//! backend [`Device`]s, storage policies ([`StoragePolicy`], [`PolicyList`])
//! and cached per-container metadata ([`ContainerInfo`]).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A backend storage endpoint.
///
/// Devices are ordered within a partition; the first R are *primaries*,
/// the rest are served lazily as *handoffs*.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Ring-wide device identifier.
    pub id: u64,
    /// URL scheme used to reach the device (`http` or `https`).
    pub scheme: String,
    /// Host name or IP address.
    pub host: String,
    /// TCP port of the backend server.
    pub port: u16,
    /// Device (drive) name on the backend server.
    pub device: String,
}

impl Device {
    /// `host:port` form, as used in update headers and log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.scheme, self.host, self.port, self.device
        )
    }
}

/// How objects under a policy are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyType {
    /// Whole-object replicas on R devices.
    Replicated,
    /// Whole objects staged in a local nursery, then erasure-coded to
    /// k+m fragment holders.
    EcNursery,
}

/// A single storage policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Policy index, referenced by `X-Backend-Storage-Policy-Index`.
    pub index: usize,
    /// Human-readable policy name, referenced by `X-Storage-Policy`.
    pub name: String,
    /// Storage mechanism for this policy.
    pub policy_type: PolicyType,
    /// Deprecated policies reject new containers.
    #[serde(default)]
    pub deprecated: bool,
    /// For [`PolicyType::EcNursery`]: how many whole-object nursery copies
    /// to write before dispersal. Caps the read device fan-out.
    #[serde(default)]
    pub nursery_replicas: Option<usize>,
}

impl StoragePolicy {
    /// Effective nursery replica count (3 when unset).
    pub fn nursery_replica_count(&self) -> usize {
        self.nursery_replicas.unwrap_or(3)
    }
}

/// The ordered set of storage policies known to the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyList {
    policies: Vec<StoragePolicy>,
}

impl PolicyList {
    /// Build a policy list. The policy with index 0 is the default.
    pub fn new(policies: Vec<StoragePolicy>) -> Self {
        Self { policies }
    }

    /// Index of the default policy.
    pub fn default_index(&self) -> usize {
        0
    }

    /// Look up a policy by index.
    pub fn get(&self, index: usize) -> Option<&StoragePolicy> {
        self.policies.iter().find(|p| p.index == index)
    }

    /// Look up a policy by name (case-sensitive, as on the wire).
    pub fn name_lookup(&self, name: &str) -> Option<&StoragePolicy> {
        self.policies.iter().find(|p| p.name == name)
    }

    /// Iterate over all policies.
    pub fn iter(&self) -> impl Iterator<Item = &StoragePolicy> {
        self.policies.iter()
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Cached metadata for one (account, container) pair.
///
/// Created from a HEAD-container response on cache miss; invalidated on any
/// container mutation. Lives 30 seconds in the shared cache tier and until
/// invalidation in the process-local tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Number of objects in the container.
    pub object_count: i64,
    /// Total bytes used by objects in the container.
    pub object_bytes: i64,
    /// Storage-policy index governing the container's objects.
    pub storage_policy_index: usize,
    /// User metadata (`X-Container-Meta-*`, prefix stripped).
    pub metadata: HashMap<String, String>,
    /// System metadata (`X-Container-Sysmeta-*`, prefix stripped).
    pub sys_metadata: HashMap<String, String>,
    /// Read ACL string (`X-Container-Read`).
    pub read_acl: String,
    /// Write ACL string (`X-Container-Write`).
    pub write_acl: String,
    /// Container sync key (`X-Container-Sync-Key`).
    pub sync_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(index: usize, name: &str, policy_type: PolicyType) -> StoragePolicy {
        StoragePolicy {
            index,
            name: name.to_string(),
            policy_type,
            deprecated: false,
            nursery_replicas: None,
        }
    }

    #[test]
    fn test_device_endpoint_and_display() {
        let dev = Device {
            id: 7,
            scheme: "http".to_string(),
            host: "10.0.0.1".to_string(),
            port: 6000,
            device: "sdb1".to_string(),
        };
        assert_eq!(dev.endpoint(), "10.0.0.1:6000");
        assert_eq!(dev.to_string(), "http://10.0.0.1:6000/sdb1");
    }

    #[test]
    fn test_policy_list_lookup() {
        let list = PolicyList::new(vec![
            policy(0, "gold", PolicyType::Replicated),
            policy(1, "ec", PolicyType::EcNursery),
        ]);
        assert_eq!(list.default_index(), 0);
        assert_eq!(list.get(1).unwrap().name, "ec");
        assert!(list.get(2).is_none());
        assert_eq!(list.name_lookup("gold").unwrap().index, 0);
        assert!(list.name_lookup("missing").is_none());
    }

    #[test]
    fn test_nursery_replica_default() {
        let mut p = policy(1, "ec", PolicyType::EcNursery);
        assert_eq!(p.nursery_replica_count(), 3);
        p.nursery_replicas = Some(5);
        assert_eq!(p.nursery_replica_count(), 5);
    }

    #[test]
    fn test_container_info_roundtrip_json() {
        let ci = ContainerInfo {
            object_count: 12,
            object_bytes: 4096,
            storage_policy_index: 1,
            metadata: HashMap::from([("Color".to_string(), "blue".to_string())]),
            sys_metadata: HashMap::new(),
            read_acl: ".r:*".to_string(),
            write_acl: String::new(),
            sync_key: String::new(),
        };
        let encoded = serde_json::to_vec(&ci).unwrap();
        let decoded: ContainerInfo = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(ci, decoded);
    }
}
