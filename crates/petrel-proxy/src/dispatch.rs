//! The two fan-out dispatchers.
//!
//! [`quorum_response`] drives replicated writes/updates: one worker per
//! primary, per-worker handoff walking on 5xx, and a collected response
//! representative of the majority status class.
//!
//! [`first_response`] drives reads: speculative staggered launches across
//! shuffled primaries (then handoffs), returning the first acceptable
//! response and aggregating 404s against other failures on exhaustion.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderValue, StatusCode, header};
use petrel_ring::{Handoffs, Ring};
use petrel_types::Device;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::backend::{BackendClient, BackendRequest};
use crate::error::ProxyError;
use crate::response::Response;

/// After quorum is reached, wait this long for stragglers so their
/// connections drain cleanly.
pub const POST_QUORUM_TIMEOUT: Duration = Duration::from_millis(100);
/// After the launch phase, wait this long for any in-flight read result.
pub const FIRST_RESPONSE_FINAL_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay between speculative read launches.
pub const REQUEST_STAGGER: Duration = Duration::from_secs(1);

/// Builder callback for quorum fan-out: (replica index, device) → request.
pub(crate) type QuorumBuildFn =
    dyn Fn(usize, &Device) -> Result<BackendRequest, ProxyError> + Send + Sync;
/// Builder callback for read fan-out: device → request.
pub(crate) type ReadBuildFn = dyn Fn(&Device) -> Result<BackendRequest, ProxyError> + Send + Sync;

/// Majority threshold for a replica count.
pub(crate) fn quorum(replicas: usize) -> usize {
    replicas.div_ceil(2)
}

/// Whether a status is final for a replica (anything except 5xx).
fn commits(status: StatusCode) -> bool {
    (200..500).contains(&status.as_u16())
}

/// Perform `build`'s request against every primary in parallel and return a
/// response representative of a quorum of nodes.
pub(crate) async fn quorum_response(
    backend: &Arc<dyn BackendClient>,
    ring: &dyn Ring,
    partition: u64,
    build: Arc<QuorumBuildFn>,
) -> Response {
    let primaries = ring.primaries(partition);
    let replicas = primaries.len();
    let handoffs = ring.handoffs(partition);
    let (response_tx, mut response_rx) = mpsc::channel::<Response>(replicas.max(1));

    for (index, primary) in primaries.into_iter().enumerate() {
        let backend = backend.clone();
        let build = build.clone();
        let handoffs = handoffs.clone();
        let response_tx = response_tx.clone();
        tokio::spawn(async move {
            let resp = try_nodes(&backend, &build, index, primary, &handoffs).await;
            let _ = response_tx.send(resp).await;
        });
    }
    drop(response_tx);

    collect_quorum(&mut response_rx, replicas).await
}

/// Walk one replica slot: the primary, then handoffs, until a response
/// commits (non-5xx) or the nodes run out.
async fn try_nodes(
    backend: &Arc<dyn BackendClient>,
    build: &Arc<QuorumBuildFn>,
    index: usize,
    primary: Device,
    handoffs: &Handoffs,
) -> Response {
    let mut first: Option<Response> = None;
    let mut dev = Some(primary);
    while let Some(d) = dev {
        let resp = attempt(backend, build(index, &d), &d).await;
        if commits(resp.status()) {
            // A committed Not Found may come from a handoff that simply
            // never saw the item; prefer the primary's original answer.
            if resp.status() == StatusCode::NOT_FOUND {
                if let Some(first) = first {
                    return first;
                }
            }
            return resp;
        }
        debug!(device = %d, status = resp.status().as_u16(), "replica failed, trying next node");
        if first.is_none() {
            first = Some(resp);
        }
        dev = handoffs.next();
    }
    first.unwrap_or_else(|| Response::stub(StatusCode::INTERNAL_SERVER_ERROR, "no nodes to try"))
}

/// Execute one built request, mapping build and transport failures to
/// 500-class stubs so they ride the handoff path.
async fn attempt(
    backend: &Arc<dyn BackendClient>,
    req: Result<BackendRequest, ProxyError>,
    dev: &Device,
) -> Response {
    match req {
        Ok(req) => match backend.execute(req).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(device = %dev, %e, "unable to get response");
                Response::stub(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        },
        Err(e) => {
            error!(device = %dev, %e, "unable to build backend request");
            Response::stub(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Bucket worker responses by status class; the first class to reach
/// quorum wins. 503 stub when no class gets there.
pub(crate) async fn collect_quorum(
    response_rx: &mut mpsc::Receiver<Response>,
    replicas: usize,
) -> Response {
    let quorum = quorum(replicas);
    let mut class_counts = [0usize; 6];
    let mut received = 0usize;
    while let Some(resp) = response_rx.recv().await {
        received += 1;
        let class = resp.status_class() as usize;
        if class < class_counts.len() {
            class_counts[class] += 1;
            if class_counts[class] >= quorum {
                drain_post_quorum(response_rx, replicas - received).await;
                return resp;
            }
        }
    }
    Response::stub(StatusCode::SERVICE_UNAVAILABLE, "unknown state")
}

/// Bounded wait for the workers that lost the race.
pub(crate) async fn drain_post_quorum(
    response_rx: &mut mpsc::Receiver<Response>,
    mut remaining: usize,
) {
    if remaining == 0 {
        return;
    }
    let deadline = tokio::time::sleep(POST_QUORUM_TIMEOUT);
    tokio::pin!(deadline);
    while remaining > 0 {
        tokio::select! {
            resp = response_rx.recv() => match resp {
                Some(_) => remaining -= 1,
                None => break,
            },
            _ = &mut deadline => break,
        }
    }
}

/// Race reads across up to `device_limit` primaries (shuffled) and the
/// handoff stream, returning the first acceptable response.
pub(crate) async fn first_response(
    backend: &Arc<dyn BackendClient>,
    ring: &dyn Ring,
    partition: u64,
    device_limit: Option<usize>,
    build: Arc<ReadBuildFn>,
) -> Response {
    let mut devs = ring.primaries(partition);
    if let Some(limit) = device_limit
        && limit > 0
    {
        devs.truncate(limit);
    }
    devs.shuffle(&mut rand::rng());
    let primaries = devs.len();
    let handoffs = ring.handoffs(partition);

    let max_requests = primaries * 2;
    let (result_tx, mut result_rx) = mpsc::channel::<Option<Response>>(max_requests.max(1));
    let mut not_founds = 0usize;
    let mut internal_errors = 0usize;
    let mut pending = 0usize;

    let mut launched = 0usize;
    while launched < max_requests {
        let dev = if launched < devs.len() {
            devs[launched].clone()
        } else {
            match handoffs.next() {
                Some(d) => d,
                None => break,
            }
        };
        launched += 1;

        let req = match build(&dev) {
            Ok(req) => req,
            Err(e) => {
                error!(device = %dev, %e, "unable to build backend request");
                internal_errors += 1;
                continue;
            }
        };
        pending += 1;
        let backend = backend.clone();
        let result_tx = result_tx.clone();
        tokio::spawn(async move {
            let result = match backend.execute(req).await {
                Ok(resp) => Some(resp),
                Err(e) => {
                    error!(device = %dev, %e, "backend request failed");
                    None
                }
            };
            let _ = result_tx.send(result).await;
        });

        tokio::select! {
            result = result_rx.recv() => {
                pending -= 1;
                if let Some(resp) =
                    interpret_response(result.flatten(), &mut not_founds, &mut internal_errors)
                {
                    return resp;
                }
            }
            _ = tokio::time::sleep(REQUEST_STAGGER) => {}
        }
    }

    let deadline = tokio::time::sleep(FIRST_RESPONSE_FINAL_TIMEOUT);
    tokio::pin!(deadline);
    while pending > 0 {
        tokio::select! {
            result = result_rx.recv() => {
                pending -= 1;
                if let Some(resp) =
                    interpret_response(result.flatten(), &mut not_founds, &mut internal_errors)
                {
                    return resp;
                }
            }
            _ = &mut deadline => {
                internal_errors += pending;
                pending = 0;
            }
        }
    }

    if not_founds > internal_errors {
        Response::stub(StatusCode::NOT_FOUND, "")
    } else {
        Response::stub(StatusCode::SERVICE_UNAVAILABLE, "")
    }
}

/// Classify one read result. Acceptable responses (2xx, 304, 412, 416) are
/// normalized and returned; everything else feeds the failure counters and
/// has its body closed.
fn interpret_response(
    result: Option<Response>,
    not_founds: &mut usize,
    internal_errors: &mut usize,
) -> Option<Response> {
    let Some(mut resp) = result else {
        *internal_errors += 1;
        return None;
    };
    let status = resp.status();
    if status.is_success()
        || status == StatusCode::NOT_MODIFIED
        || status == StatusCode::PRECONDITION_FAILED
        || status == StatusCode::RANGE_NOT_SATISFIABLE
    {
        resp.headers_mut()
            .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Some(etag) = resp.headers().get(header::ETAG).cloned()
            && let Ok(raw) = etag.to_str()
        {
            let trimmed = raw.trim_matches('"');
            if trimmed != raw
                && let Ok(value) = HeaderValue::from_str(trimmed)
            {
                resp.headers_mut().insert(header::ETAG, value);
            }
        }
        return Some(resp);
    }
    if status == StatusCode::NOT_FOUND {
        *not_founds += 1;
    } else {
        *internal_errors += 1;
    }
    drop(resp);
    None
}
