//! Two-tier container-info cache.
//!
//! Tier one is a process-local map behind a reader-writer lock; tier two is
//! an optional external shared key-value cache with a 30-second TTL,
//! reached through the [`SharedCache`] seam. Both tiers are best-effort:
//! the local lock is released before any I/O, and a missed invalidation is
//! healed by the shared-tier TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use petrel_types::ContainerInfo;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ProxyError;

/// Shared-cache lifetime for container info.
pub const CONTAINER_INFO_TTL: Duration = Duration::from_secs(30);

/// External shared key-value cache (memcache-style). Values are opaque
/// bytes; container info travels as JSON.
#[async_trait::async_trait]
pub trait SharedCache: Send + Sync {
    /// Fetch a value, `None` on miss or expiry.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    /// Store a value with a lifetime.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
    /// Drop a value.
    async fn delete(&self, key: &str);
}

/// In-memory [`SharedCache`] for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySharedCache {
    entries: tokio::sync::Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemorySharedCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

/// The proxy's container-info cache.
pub(crate) struct ContainerCache {
    local: RwLock<HashMap<String, ContainerInfo>>,
    shared: Option<Arc<dyn SharedCache>>,
}

fn cache_key(account: &str, container: &str) -> String {
    format!("container/{account}/{container}")
}

impl ContainerCache {
    pub(crate) fn new(shared: Option<Arc<dyn SharedCache>>) -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            shared,
        }
    }

    /// Local tier, then shared tier. Misses return `None`; the caller HEADs
    /// the container.
    pub(crate) async fn lookup(&self, account: &str, container: &str) -> Option<ContainerInfo> {
        let key = cache_key(account, container);
        {
            let local = self.local.read().await;
            if let Some(info) = local.get(&key) {
                return Some(info.clone());
            }
        }
        let shared = self.shared.as_ref()?;
        let raw = shared.get(&key).await?;
        match serde_json::from_slice::<ContainerInfo>(&raw) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(%key, %e, "discarding undecodable shared cache entry");
                None
            }
        }
    }

    /// Store into both tiers.
    pub(crate) async fn store(&self, account: &str, container: &str, info: &ContainerInfo) {
        let key = cache_key(account, container);
        if let Some(shared) = &self.shared
            && let Ok(raw) = serde_json::to_vec(info)
        {
            shared.set(&key, raw, CONTAINER_INFO_TTL).await;
        }
        self.local.write().await.insert(key, info.clone());
    }

    /// Remove from both tiers.
    pub(crate) async fn invalidate(&self, account: &str, container: &str) {
        let key = cache_key(account, container);
        self.local.write().await.remove(&key);
        if let Some(shared) = &self.shared {
            shared.delete(&key).await;
        }
    }
}

/// Parse container info out of a HEAD-container response.
///
/// The count, bytes and policy headers are required; everything else is
/// optional metadata.
pub(crate) fn parse_container_info(headers: &HeaderMap) -> Result<ContainerInfo, ProxyError> {
    let mut info = ContainerInfo {
        object_count: required_int(headers, "x-container-object-count")?,
        object_bytes: required_int(headers, "x-container-bytes-used")?,
        storage_policy_index: required_int(headers, "x-backend-storage-policy-index")? as usize,
        ..ContainerInfo::default()
    };
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        let name = name.as_str();
        if let Some(key) = name.strip_prefix("x-container-meta-") {
            info.metadata.insert(key.to_string(), value.to_string());
        } else if let Some(key) = name.strip_prefix("x-container-sysmeta-") {
            info.sys_metadata.insert(key.to_string(), value.to_string());
        } else if name == "x-container-read" {
            info.read_acl = value.to_string();
        } else if name == "x-container-write" {
            info.write_acl = value.to_string();
        } else if name == "x-container-sync-key" {
            info.sync_key = value.to_string();
        }
    }
    Ok(info)
}

fn required_int(headers: &HeaderMap, name: &str) -> Result<i64, ProxyError> {
    let value = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    value
        .parse()
        .map_err(|_| ProxyError::InvalidContainerInfo {
            header: name.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::set_header;

    fn info(policy: usize) -> ContainerInfo {
        ContainerInfo {
            object_count: 5,
            object_bytes: 1234,
            storage_policy_index: policy,
            ..ContainerInfo::default()
        }
    }

    #[tokio::test]
    async fn test_local_tier_hit() {
        let cache = ContainerCache::new(None);
        assert!(cache.lookup("a", "c").await.is_none());
        cache.store("a", "c", &info(1)).await;
        assert_eq!(cache.lookup("a", "c").await.unwrap().storage_policy_index, 1);
    }

    #[tokio::test]
    async fn test_shared_tier_backfills_local_miss() {
        let shared = Arc::new(MemorySharedCache::new());
        let writer = ContainerCache::new(Some(shared.clone()));
        writer.store("a", "c", &info(2)).await;

        // A different process-local cache, same shared tier.
        let reader = ContainerCache::new(Some(shared));
        assert_eq!(reader.lookup("a", "c").await.unwrap().storage_policy_index, 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_tiers() {
        let shared = Arc::new(MemorySharedCache::new());
        let cache = ContainerCache::new(Some(shared.clone()));
        cache.store("a", "c", &info(0)).await;
        cache.invalidate("a", "c").await;
        assert!(cache.lookup("a", "c").await.is_none());
        assert!(shared.get("container/a/c").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_tier_expires() {
        let shared = Arc::new(MemorySharedCache::new());
        shared
            .set("k", b"v".to_vec(), CONTAINER_INFO_TTL)
            .await;
        assert!(shared.get("k").await.is_some());
        tokio::time::advance(CONTAINER_INFO_TTL + Duration::from_secs(1)).await;
        assert!(shared.get("k").await.is_none());
    }

    #[test]
    fn test_parse_container_info_full() {
        let mut headers = HeaderMap::new();
        set_header(&mut headers, "X-Container-Object-Count", "42");
        set_header(&mut headers, "X-Container-Bytes-Used", "4096");
        set_header(&mut headers, "X-Backend-Storage-Policy-Index", "1");
        set_header(&mut headers, "X-Container-Meta-Color", "blue");
        set_header(&mut headers, "X-Container-Sysmeta-Shard", "yes");
        set_header(&mut headers, "X-Container-Read", ".r:*");
        set_header(&mut headers, "X-Container-Write", "acct:user");
        set_header(&mut headers, "X-Container-Sync-Key", "sekrit");

        let info = parse_container_info(&headers).unwrap();
        assert_eq!(info.object_count, 42);
        assert_eq!(info.object_bytes, 4096);
        assert_eq!(info.storage_policy_index, 1);
        assert_eq!(info.metadata.get("color").unwrap(), "blue");
        assert_eq!(info.sys_metadata.get("shard").unwrap(), "yes");
        assert_eq!(info.read_acl, ".r:*");
        assert_eq!(info.write_acl, "acct:user");
        assert_eq!(info.sync_key, "sekrit");
    }

    #[test]
    fn test_parse_container_info_missing_required_header() {
        let mut headers = HeaderMap::new();
        set_header(&mut headers, "X-Container-Object-Count", "42");
        set_header(&mut headers, "X-Container-Bytes-Used", "4096");
        let err = parse_container_info(&headers).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidContainerInfo { .. }));
    }

    #[test]
    fn test_parse_container_info_bad_count() {
        let mut headers = HeaderMap::new();
        set_header(&mut headers, "X-Container-Object-Count", "many");
        set_header(&mut headers, "X-Container-Bytes-Used", "4096");
        set_header(&mut headers, "X-Backend-Storage-Policy-Index", "0");
        assert!(parse_container_info(&headers).is_err());
    }
}
