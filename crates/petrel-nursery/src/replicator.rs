//! The nursery replicator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use http::Method;
use petrel_ec::{
    CHUNK_SIZE_HEADER, EC_POLICY_HEADER, EcParams, FRAG_INDEX_HEADER, ec_split,
};
use petrel_proxy::{BackendBody, BackendClient, BackendRequest, OBJECT_TRANSFER_TIMEOUT};
use petrel_ring::Ring;
use petrel_types::Device;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::NurseryError;

/// Buffer size for the per-fragment pipes feeding the PUT bodies.
const FRAGMENT_PIPE_BUFFER: usize = 64 * 1024;

/// Counters for one replication pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    /// Data entries fully dispersed to their fragment holders.
    pub replicated: usize,
    /// Tombstones fully propagated (and locally removed).
    pub tombstones: usize,
    /// Entries that stay in the nursery for retry.
    pub failed: usize,
    /// Directory entries that were not nursery objects.
    pub skipped: usize,
}

/// Per-entry metadata sidecar (`<timestamp>.json`).
///
/// When present its values are authoritative; entries without one fall
/// back to [`EcParams::DEFAULT`].
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    k: usize,
    m: usize,
    chunk_size: usize,
}

enum EntryKind {
    Data,
    Tombstone,
}

/// Fans locally-staged whole objects out to their `k + m` fragment
/// holders, and propagates deletions.
pub struct NurseryReplicator {
    backend: Arc<dyn BackendClient>,
    ring: Arc<dyn Ring>,
    drive_root: PathBuf,
}

impl NurseryReplicator {
    /// Build a replicator over the EC ring and a local drive root.
    pub fn new(backend: Arc<dyn BackendClient>, ring: Arc<dyn Ring>, drive_root: PathBuf) -> Self {
        Self {
            backend,
            ring,
            drive_root,
        }
    }

    /// Device names under the drive root that carry a nursery tree.
    pub async fn local_devices(&self) -> Result<Vec<String>, NurseryError> {
        let mut devices = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.drive_root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(devices),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join("ec").join("nursery").is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                devices.push(name.to_string());
            }
        }
        devices.sort();
        Ok(devices)
    }

    /// Run one replication pass over every local device's nursery.
    pub async fn replicate_all(&self) -> Result<ReplicationStats, NurseryError> {
        let mut total = ReplicationStats::default();
        for device in self.local_devices().await? {
            let stats = self.replicate_device(&device).await?;
            total.replicated += stats.replicated;
            total.tombstones += stats.tombstones;
            total.failed += stats.failed;
            total.skipped += stats.skipped;
        }
        Ok(total)
    }

    /// Run one replication pass over a single device's nursery.
    pub async fn replicate_device(&self, device: &str) -> Result<ReplicationStats, NurseryError> {
        let nursery = self.drive_root.join(device).join("ec").join("nursery");
        if !nursery.is_dir() {
            return Err(NurseryError::NoNursery(nursery));
        }

        let mut stats = ReplicationStats::default();
        let mut entries = tokio::fs::read_dir(&nursery).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(hash) = entry.file_name().to_str().map(str::to_string) else {
                stats.skipped += 1;
                continue;
            };
            if !is_object_hash(&hash) || !entry.path().is_dir() {
                stats.skipped += 1;
                continue;
            }
            match self.replicate_entry(&hash, &entry.path()).await {
                Ok(EntryOutcome::Replicated) => stats.replicated += 1,
                Ok(EntryOutcome::TombstonePropagated) => stats.tombstones += 1,
                Ok(EntryOutcome::Empty) => stats.skipped += 1,
                Err(e) => {
                    warn!(%hash, %e, "nursery entry left for retry");
                    stats.failed += 1;
                }
            }
        }
        info!(
            device,
            replicated = stats.replicated,
            tombstones = stats.tombstones,
            failed = stats.failed,
            "nursery pass complete"
        );
        Ok(stats)
    }

    async fn replicate_entry(&self, hash: &str, dir: &Path) -> Result<EntryOutcome, NurseryError> {
        let Some((kind, file, meta)) = newest_object_file(dir).await? else {
            return Ok(EntryOutcome::Empty);
        };
        let params = match meta {
            Some(meta) => EcParams::new(meta.k, meta.m, meta.chunk_size)?,
            None => EcParams::DEFAULT,
        };

        // Top `partition_bit_count` bits of the hash's 32-bit prefix.
        let prefix = u32::from_str_radix(&hash[..8], 16)
            .map_err(|_| NurseryError::ReplicationFailed(hash.to_string()))?;
        let partition = self.ring.partition_for_hash(prefix);
        let nodes = self.ring.primaries(partition);
        if nodes.len() < params.total() {
            return Err(NurseryError::NotEnoughNodes {
                needed: params.total(),
                available: nodes.len(),
            });
        }

        match kind {
            EntryKind::Tombstone => {
                self.propagate_delete(hash, &nodes).await?;
                tokio::fs::remove_dir_all(dir).await?;
                Ok(EntryOutcome::TombstonePropagated)
            }
            EntryKind::Data => {
                self.scatter_fragments(hash, &file, params, &nodes).await?;
                Ok(EntryOutcome::Replicated)
            }
        }
    }

    /// DELETE every fragment endpoint; all must acknowledge with 2xx.
    async fn propagate_delete(&self, hash: &str, nodes: &[Device]) -> Result<(), NurseryError> {
        let deletes = nodes.iter().map(|node| {
            let req = BackendRequest::new(Method::DELETE, fragment_url(node, hash));
            async move {
                match self.backend.execute(req).await {
                    Ok(resp) => resp.status().is_success(),
                    Err(_) => false,
                }
            }
        });
        let results = futures::future::join_all(deletes).await;
        if results.iter().all(|ok| *ok) {
            debug!(%hash, "tombstone propagated");
            Ok(())
        } else {
            Err(NurseryError::ReplicationFailed(hash.to_string()))
        }
    }

    /// Open the data file, spawn `k + m` fragment PUTs fed by per-node
    /// pipes, and drive one split pass over the file as the producer.
    async fn scatter_fragments(
        &self,
        hash: &str,
        data_file: &Path,
        params: EcParams,
        nodes: &[Device],
    ) -> Result<(), NurseryError> {
        let mut file = tokio::fs::File::open(data_file).await?;
        let content_length = file.metadata().await?.len();

        let mut writers = Vec::with_capacity(params.total());
        let mut requests = Vec::with_capacity(params.total());
        for (index, node) in nodes.iter().take(params.total()).enumerate() {
            let (write_half, read_half) = tokio::io::duplex(FRAGMENT_PIPE_BUFFER);
            writers.push(write_half);

            let mut req = BackendRequest::new(Method::PUT, fragment_url(node, hash));
            set_header(&mut req, FRAG_INDEX_HEADER, &index.to_string());
            set_header(&mut req, EC_POLICY_HEADER, &params.policy_header());
            set_header(&mut req, CHUNK_SIZE_HEADER, &params.chunk_size.to_string());
            req.body = BackendBody::Stream(ReaderStream::new(read_half).boxed());
            req.timeout = OBJECT_TRANSFER_TIMEOUT;

            let backend = self.backend.clone();
            requests.push(tokio::spawn(async move { backend.execute(req).await }));
        }

        let split_result = ec_split(
            params.k,
            params.m,
            &mut file,
            params.chunk_size,
            content_length,
            &mut writers,
        )
        .await;
        for writer in &mut writers {
            let _ = writer.shutdown().await;
        }
        drop(writers);

        let mut success = true;
        for request in requests {
            match request.await {
                Ok(Ok(resp)) if resp.status().is_success() => {}
                Ok(Ok(resp)) => {
                    debug!(%hash, status = resp.status().as_u16(), "fragment PUT rejected");
                    success = false;
                }
                _ => success = false,
            }
        }
        split_result?;
        if success {
            debug!(%hash, content_length, "entry dispersed to fragment holders");
            Ok(())
        } else {
            Err(NurseryError::ReplicationFailed(hash.to_string()))
        }
    }
}

enum EntryOutcome {
    Replicated,
    TombstonePropagated,
    Empty,
}

/// `/ec-frag/<device>/<object-hash>` on a node.
fn fragment_url(node: &Device, hash: &str) -> String {
    format!(
        "{}://{}/ec-frag/{}/{}",
        node.scheme,
        node.endpoint(),
        node.device,
        hash
    )
}

fn set_header(req: &mut BackendRequest, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        http::HeaderName::try_from(name.to_ascii_lowercase()),
        http::HeaderValue::from_str(value),
    ) {
        req.headers.insert(name, value);
    }
}

/// 32 lowercase hex characters.
fn is_object_hash(name: &str) -> bool {
    name.len() == 32 && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// Newest `.data` or `.ts` file in an entry directory, with its optional
/// metadata sidecar. Timestamp-named files sort lexically.
async fn newest_object_file(
    dir: &Path,
) -> Result<Option<(EntryKind, PathBuf, Option<EntryMeta>)>, NurseryError> {
    let mut names: Vec<String> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str()
            && (name.ends_with(".data") || name.ends_with(".ts"))
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    let Some(name) = names.pop() else {
        return Ok(None);
    };
    let path = dir.join(&name);
    let kind = if name.ends_with(".ts") {
        EntryKind::Tombstone
    } else {
        EntryKind::Data
    };
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&name);
    let meta_path = dir.join(format!("{stem}.json"));
    let meta = match tokio::fs::read(&meta_path).await {
        Ok(raw) => serde_json::from_slice(&raw).ok(),
        Err(_) => None,
    };
    Ok(Some((kind, path, meta)))
}
