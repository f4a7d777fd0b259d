//! Quarantine repair decisions.
//!
//! When a backend quarantines a damaged copy, the item's remaining replicas
//! may or may not still exist. [`QuarantineRepair::repair_entry`] asks every
//! primary for the item and decides:
//!
//! - every primary says 404 → the item was deleted after it was
//!   quarantined; the quarantine record can be dropped ([`Handled`]);
//! - nobody has it but not everyone reported in → try again later
//!   ([`Retry`]);
//! - someone has it → stream a copy from a holder onto each device that is
//!   missing it (or was unsure); only full success is [`Handled`].
//!
//! [`Handled`]: RepairOutcome::Handled
//! [`Retry`]: RepairOutcome::Retry

use std::sync::Arc;

use http::Method;
use petrel_proxy::{BackendBody, BackendClient, BackendRequest, OBJECT_TRANSFER_TIMEOUT};
use petrel_ring::Ring;
use petrel_types::Device;
use tracing::debug;

/// What to do with a quarantine record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The entry has been handled as well as possible; delete the
    /// quarantine record.
    Handled,
    /// Leave the record in place and revisit on a later pass.
    Retry,
}

/// Repairs quarantined account/container/object entries by name.
pub struct QuarantineRepair {
    backend: Arc<dyn BackendClient>,
}

impl QuarantineRepair {
    /// Repair driver over the shared backend transport.
    pub fn new(backend: Arc<dyn BackendClient>) -> Self {
        Self { backend }
    }

    /// Decide (and where possible restore) one quarantined entry.
    ///
    /// `container` and `object` may be empty for account- and
    /// container-level entries.
    pub async fn repair_entry(
        &self,
        ring: &dyn Ring,
        account: &str,
        container: &str,
        object: &str,
    ) -> RepairOutcome {
        let partition = ring.partition(account, container, object);
        let primaries = ring.primaries(partition);
        let replica_count = primaries.len();

        let mut have: Vec<Device> = Vec::new();
        let mut not_found: Vec<Device> = Vec::new();
        let mut unsure: Vec<Device> = Vec::new();
        for device in primaries {
            let url = entry_url(&device, partition, account, container, object);
            let req = BackendRequest::new(Method::HEAD, url);
            match self.backend.execute(req).await {
                Ok(resp) if resp.status().is_success() => have.push(device),
                Ok(resp) if resp.status() == http::StatusCode::NOT_FOUND => not_found.push(device),
                Ok(resp) => {
                    debug!(device = %device, status = resp.status().as_u16(), "unsure about replica");
                    unsure.push(device);
                }
                Err(e) => {
                    debug!(device = %device, %e, "replica did not report in");
                    return RepairOutcome::Retry;
                }
            }
        }

        if not_found.len() == replica_count {
            // Nobody has it: it was deleted after it got quarantined.
            debug!(account, container, object, "entry gone everywhere, quarantine record handled");
            return RepairOutcome::Handled;
        }
        if have.is_empty() {
            // Nobody admits to having it, but some replicas were unsure;
            // leave the record for a later pass.
            return RepairOutcome::Retry;
        }

        let source = have[0].clone();
        for target in not_found.iter().chain(unsure.iter()) {
            if !self
                .put_copy(partition, account, container, object, &source, target)
                .await
            {
                return RepairOutcome::Retry;
            }
        }
        RepairOutcome::Handled
    }

    /// Stream a copy of the entry from `source` to `target`.
    async fn put_copy(
        &self,
        partition: u64,
        account: &str,
        container: &str,
        object: &str,
        source: &Device,
        target: &Device,
    ) -> bool {
        let from_url = entry_url(source, partition, account, container, object);
        let from_resp = match self.backend.execute(BackendRequest::new(Method::GET, from_url)).await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(source = %source, status = resp.status().as_u16(), "holder refused the copy read");
                return false;
            }
            Err(e) => {
                debug!(source = %source, %e, "copy read failed");
                return false;
            }
        };

        let to_url = entry_url(target, partition, account, container, object);
        let mut req = BackendRequest::new(Method::PUT, to_url);
        req.headers = from_resp.headers().clone();
        req.body = BackendBody::Stream(from_resp.into_stream());
        req.timeout = OBJECT_TRANSFER_TIMEOUT;
        match self.backend.execute(req).await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(target = %target, status = resp.status().as_u16(), "copy write rejected");
                false
            }
            Err(e) => {
                debug!(target = %target, %e, "copy write failed");
                false
            }
        }
    }
}

/// Backend URL for an entry at any level of the hierarchy.
fn entry_url(
    device: &Device,
    partition: u64,
    account: &str,
    container: &str,
    object: &str,
) -> String {
    let mut url = format!(
        "{}://{}/{}/{}/{}",
        device.scheme,
        device.endpoint(),
        device.device,
        partition,
        account
    );
    if !container.is_empty() {
        url.push('/');
        url.push_str(container);
        if !object.is_empty() {
            url.push('/');
            url.push_str(object);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use petrel_proxy::testing::{ScriptedBackend, ScriptedReply};
    use petrel_ring::StaticRing;

    fn device(id: u64) -> Device {
        Device {
            id,
            scheme: "http".to_string(),
            host: format!("10.0.0.{id}"),
            port: 6000,
            device: format!("sd{id}"),
        }
    }

    fn test_ring() -> StaticRing {
        StaticRing::new((0..3).map(device).collect(), 3, 16, "p", "s")
    }

    #[tokio::test]
    async fn test_all_primaries_404_means_handled() {
        // HEAD to all three primaries answers 404: the item was deleted
        // after quarantine, so the record should be dropped.
        let ring = test_ring();
        let mut backend = ScriptedBackend::new();
        for dev in ring.devices() {
            backend = backend.on("HEAD", &dev.endpoint(), ScriptedReply::status(404));
        }
        let repair = QuarantineRepair::new(Arc::new(backend));
        let outcome = repair.repair_entry(&ring, "AUTH_a", "c", "o").await;
        assert_eq!(outcome, RepairOutcome::Handled);
    }

    #[tokio::test]
    async fn test_nobody_has_it_but_unsure_means_retry() {
        let ring = test_ring();
        let primaries = ring.primaries(ring.partition("AUTH_a", "c", "o"));
        let backend = ScriptedBackend::new()
            .on("HEAD", &primaries[0].endpoint(), ScriptedReply::status(404))
            .on("HEAD", &primaries[1].endpoint(), ScriptedReply::status(404))
            .on("HEAD", &primaries[2].endpoint(), ScriptedReply::status(500));
        let repair = QuarantineRepair::new(Arc::new(backend));
        let outcome = repair.repair_entry(&ring, "AUTH_a", "c", "o").await;
        assert_eq!(outcome, RepairOutcome::Retry);
    }

    #[tokio::test]
    async fn test_holder_copies_to_missing_and_unsure() {
        let ring = test_ring();
        let primaries = ring.primaries(ring.partition("AUTH_a", "c", "o"));
        let backend = ScriptedBackend::new()
            .on(
                "HEAD",
                &primaries[0].endpoint(),
                ScriptedReply::status(200),
            )
            .on("HEAD", &primaries[1].endpoint(), ScriptedReply::status(404))
            .on("HEAD", &primaries[2].endpoint(), ScriptedReply::status(503))
            .on(
                "GET",
                &primaries[0].endpoint(),
                ScriptedReply::status(200).body(&b"restored content"[..]),
            )
            .on("PUT", &primaries[1].endpoint(), ScriptedReply::status(201))
            .on("PUT", &primaries[2].endpoint(), ScriptedReply::status(201));
        let backend = Arc::new(backend);
        let repair = QuarantineRepair::new(backend.clone());
        let outcome = repair.repair_entry(&ring, "AUTH_a", "c", "o").await;
        assert_eq!(outcome, RepairOutcome::Handled);

        let puts: Vec<_> = backend
            .requests()
            .await
            .into_iter()
            .filter(|r| r.method == Method::PUT)
            .collect();
        assert_eq!(puts.len(), 2, "both the missing and the unsure device get a copy");
        for put in &puts {
            assert_eq!(&put.body[..], b"restored content");
        }
    }

    #[tokio::test]
    async fn test_rejected_copy_means_retry() {
        let ring = test_ring();
        let primaries = ring.primaries(ring.partition("AUTH_a", "c", "o"));
        let backend = ScriptedBackend::new()
            .on("HEAD", &primaries[0].endpoint(), ScriptedReply::status(200))
            .on("HEAD", &primaries[1].endpoint(), ScriptedReply::status(404))
            .on("HEAD", &primaries[2].endpoint(), ScriptedReply::status(200))
            .on(
                "GET",
                &primaries[0].endpoint(),
                ScriptedReply::status(200).body(&b"x"[..]),
            )
            .on("PUT", &primaries[1].endpoint(), ScriptedReply::status(507));
        let repair = QuarantineRepair::new(Arc::new(backend));
        let outcome = repair.repair_entry(&ring, "AUTH_a", "c", "o").await;
        assert_eq!(outcome, RepairOutcome::Retry);
    }

    #[tokio::test]
    async fn test_unreachable_replica_means_retry() {
        let ring = test_ring();
        let mut backend = ScriptedBackend::new();
        for dev in ring.devices() {
            backend = backend.on("HEAD", &dev.endpoint(), ScriptedReply::transport_error());
        }
        let repair = QuarantineRepair::new(Arc::new(backend));
        let outcome = repair.repair_entry(&ring, "AUTH_a", "", "").await;
        assert_eq!(outcome, RepairOutcome::Retry);
    }

    #[tokio::test]
    async fn test_account_level_entry_url_has_no_container() {
        let ring = test_ring();
        let mut backend = ScriptedBackend::new();
        for dev in ring.devices() {
            backend = backend.on("HEAD", &dev.endpoint(), ScriptedReply::status(404));
        }
        let backend = Arc::new(backend);
        let repair = QuarantineRepair::new(backend.clone());
        let outcome = repair.repair_entry(&ring, "AUTH_a", "", "").await;
        assert_eq!(outcome, RepairOutcome::Handled);
        for req in backend.requests().await {
            assert!(req.url.ends_with("/AUTH_a"), "url: {}", req.url);
        }
    }
}
