//! TOML configuration for the Petrel daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use petrel_ring::{Ring, StaticRing};
use petrel_types::{Device, StoragePolicy};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Proxy-wide settings.
    pub proxy: ProxySection,
    /// The account ring.
    pub account_ring: RingSection,
    /// The container ring.
    pub container_ring: RingSection,
    /// One object ring per storage policy.
    pub object_rings: Vec<ObjectRingSection>,
    /// The storage policies, index 0 is the default.
    pub policies: Vec<StoragePolicy>,
    /// Erasure-coded pipeline settings.
    pub ec: EcSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[proxy]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// Bind address for the gossip/nursery surface.
    pub bind_addr: String,
    /// Hash path prefix shared with the backend servers.
    pub hash_path_prefix: String,
    /// Hash path suffix shared with the backend servers.
    pub hash_path_suffix: String,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:6002".to_string(),
            hash_path_prefix: String::new(),
            hash_path_suffix: String::new(),
        }
    }
}

/// A ring described inline in the config: the daemon's static snapshot.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RingSection {
    /// Primary copies per partition.
    pub replicas: usize,
    /// High bits of the key hash that select the partition.
    pub partition_bits: u32,
    /// The ring's devices, in placement-walk order.
    pub devices: Vec<Device>,
}

impl Default for RingSection {
    fn default() -> Self {
        Self {
            replicas: 3,
            partition_bits: 16,
            devices: Vec::new(),
        }
    }
}

/// `[[object_rings]]` entry: a ring bound to a storage policy.
#[derive(Debug, Deserialize)]
pub struct ObjectRingSection {
    /// Storage policy index this ring serves.
    pub policy: usize,
    /// The ring itself.
    #[serde(flatten)]
    pub ring: RingSection,
}

/// `[ec]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EcSection {
    /// Local drive root holding `<device>/ec/nursery` trees.
    pub drive_root: PathBuf,
    /// The fragment-holder ring (replica count = k + m).
    pub ring: RingSection,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load config from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Build a ring snapshot from a config section.
    pub fn build_ring(&self, section: &RingSection) -> Arc<dyn Ring> {
        Arc::new(StaticRing::new(
            section.devices.clone(),
            section.replicas,
            section.partition_bits,
            &self.proxy.hash_path_prefix,
            &self.proxy.hash_path_suffix,
        ))
    }

    /// The object ring section for a policy index, if configured.
    pub fn object_ring(&self, policy: usize) -> Option<&RingSection> {
        self.object_rings
            .iter()
            .find(|entry| entry.policy == policy)
            .map(|entry| &entry.ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petrel_types::PolicyType;

    const FULL: &str = r#"
[proxy]
bind_addr = "127.0.0.1:7002"
hash_path_prefix = "pfx"
hash_path_suffix = "sfx"

[account_ring]
replicas = 3
partition_bits = 18
devices = [
    { id = 0, scheme = "http", host = "10.0.0.1", port = 6002, device = "sda" },
    { id = 1, scheme = "http", host = "10.0.0.2", port = 6002, device = "sdb" },
    { id = 2, scheme = "http", host = "10.0.0.3", port = 6002, device = "sdc" },
]

[container_ring]
replicas = 3
devices = [
    { id = 0, scheme = "http", host = "10.0.1.1", port = 6001, device = "sda" },
]

[[object_rings]]
policy = 0
replicas = 3
devices = [
    { id = 0, scheme = "http", host = "10.0.2.1", port = 6000, device = "sda" },
]

[[policies]]
index = 0
name = "gold"
policy_type = "replicated"

[[policies]]
index = 1
name = "heck"
policy_type = "ec-nursery"
nursery_replicas = 3

[ec]
drive_root = "/srv/node"

[ec.ring]
replicas = 10
devices = []

[log]
level = "debug"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = DaemonConfig::from_toml(FULL).unwrap();
        assert_eq!(config.proxy.bind_addr, "127.0.0.1:7002");
        assert_eq!(config.proxy.hash_path_prefix, "pfx");
        assert_eq!(config.account_ring.replicas, 3);
        assert_eq!(config.account_ring.partition_bits, 18);
        assert_eq!(config.account_ring.devices.len(), 3);
        assert_eq!(config.account_ring.devices[1].host, "10.0.0.2");
        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.policies[1].policy_type, PolicyType::EcNursery);
        assert_eq!(config.policies[1].nursery_replicas, Some(3));
        assert_eq!(config.ec.drive_root, PathBuf::from("/srv/node"));
        assert_eq!(config.ec.ring.replicas, 10);
        assert_eq!(config.log.level, "debug");
        assert!(config.object_ring(0).is_some());
        assert!(config.object_ring(9).is_none());
    }

    #[test]
    fn test_parse_minimal_config_defaults() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config.proxy.bind_addr, "0.0.0.0:6002");
        assert_eq!(config.account_ring.replicas, 3);
        assert_eq!(config.account_ring.partition_bits, 16);
        assert!(config.policies.is_empty());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_build_ring_uses_hash_paths() {
        let config = DaemonConfig::from_toml(FULL).unwrap();
        let ring = config.build_ring(&config.account_ring);
        assert_eq!(ring.replica_count(), 3);
        assert_eq!(ring.partition_bit_count(), 18);
        // Same key, same partition: the snapshot is deterministic.
        assert_eq!(
            ring.partition("AUTH_a", "", ""),
            ring.partition("AUTH_a", "", "")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("petrel.toml");
        std::fs::write(&path, "[log]\nlevel = \"warn\"\n").unwrap();
        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_load_without_file_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.log.level, "info");
    }
}
