//! The quorum streaming writer: 100-continue pipes and the quorum copy.
//!
//! Each replica PUT gets a fresh pipe. The read end is the request body; a
//! backend that accepts the `Expect: 100-continue` handshake starts polling
//! it, and that first poll publishes the pipe's write end on the *ready*
//! channel. The source body is copied only once a quorum of replicas has
//! committed a writer and every replica has either committed or failed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http::StatusCode;
use petrel_ring::Handoffs;
use petrel_types::Device;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::backend::{BackendClient, BackendRequest};
use crate::dispatch::{drain_post_quorum, quorum};
use crate::error::ProxyError;
use crate::response::Response;

/// Copy granularity for the body fan-out.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Builder callback for streaming PUT fan-out:
/// (replica index, device, pipe read end) → request.
pub(crate) type PutBuildFn =
    dyn Fn(usize, &Device, PutBody) -> Result<BackendRequest, ProxyError> + Send + Sync;

/// Write end of a replica pipe.
pub(crate) struct ChunkWriter {
    chunks: mpsc::Sender<Bytes>,
}

impl ChunkWriter {
    /// Send one chunk; `false` means the pipe's request is gone.
    pub(crate) async fn write(&self, chunk: Bytes) -> bool {
        self.chunks.send(chunk).await.is_ok()
    }
}

/// Read end of a replica pipe, used as the HTTP request body.
///
/// The first poll publishes the paired [`ChunkWriter`] on the ready channel;
/// a closed cancel signal turns every subsequent poll into an error so the
/// transport aborts the request instead of waiting on a body that will
/// never come.
pub(crate) struct PutBody {
    chunks: mpsc::Receiver<Bytes>,
    ready: Option<(mpsc::Sender<ChunkWriter>, ChunkWriter)>,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
    cancel_fired: bool,
}

/// Build a replica pipe: the returned [`PutBody`] goes into the request,
/// and its write end is published on `ready_tx` at first poll.
pub(crate) fn put_pipe(ready_tx: mpsc::Sender<ChunkWriter>, cancel: watch::Receiver<bool>) -> PutBody {
    let (chunk_tx, chunk_rx) = mpsc::channel(1);
    let mut cancel = cancel;
    let cancelled = Box::pin(async move {
        if *cancel.borrow_and_update() {
            return;
        }
        loop {
            if cancel.changed().await.is_err() {
                return;
            }
            if *cancel.borrow() {
                return;
            }
        }
    });
    PutBody {
        chunks: chunk_rx,
        ready: Some((ready_tx, ChunkWriter { chunks: chunk_tx })),
        cancelled,
        cancel_fired: false,
    }
}

impl Stream for PutBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel_fired {
            return Poll::Ready(Some(Err(std::io::Error::other(ProxyError::Cancelled))));
        }
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.cancel_fired = true;
            return Poll::Ready(Some(Err(std::io::Error::other(ProxyError::Cancelled))));
        }
        if let Some((ready_tx, writer)) = this.ready.take() {
            // First poll: the backend accepted the handshake and wants the
            // body, so commit our write end.
            if ready_tx.try_send(writer).is_err() {
                this.cancel_fired = true;
                return Poll::Ready(Some(Err(std::io::Error::other(ProxyError::Cancelled))));
            }
        }
        match this.chunks.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Copy `src` to every live writer, chunk by chunk, concurrently.
///
/// A chunk succeeds when at least `quorum` writers accept it; writers that
/// fail are dropped from the set. The copy fails only when fewer than
/// `quorum` pipes remain.
pub(crate) async fn copy_quorum<R>(
    src: &mut R,
    quorum: usize,
    writers: &mut Vec<ChunkWriter>,
) -> Result<u64, ProxyError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        let results =
            futures::future::join_all(writers.iter().map(|w| w.write(chunk.clone()))).await;
        let mut outcome = results.into_iter();
        writers.retain(|_| outcome.next().unwrap_or(false));
        if writers.len() < quorum {
            return Err(ProxyError::QuorumWrite {
                live: writers.len(),
                quorum,
            });
        }
        total += n as u64;
    }
    Ok(total)
}

/// Stream one source body to a quorum of replicas.
///
/// Spawns one worker per device (with handoff retries); collects pipe
/// write-ends and final statuses; copies the body once
/// `ready ≥ quorum && ready + responses == replicas`; applies the quorum
/// rule to the final status codes.
pub(crate) async fn quorum_put(
    backend: &Arc<dyn BackendClient>,
    devs: Vec<Device>,
    handoffs: Handoffs,
    build: Arc<PutBuildFn>,
    mut src: Box<dyn AsyncRead + Send + Unpin>,
) -> Response {
    let replicas = devs.len();
    let quorum = quorum(replicas);
    let (ready_tx, mut ready_rx) = mpsc::channel::<ChunkWriter>(replicas.max(1));
    let (response_tx, mut response_rx) = mpsc::channel::<Response>(replicas.max(1));
    let (cancel_tx, cancel_rx) = watch::channel(false);

    for (index, primary) in devs.into_iter().enumerate() {
        let backend = backend.clone();
        let build = build.clone();
        let handoffs = handoffs.clone();
        let ready_tx = ready_tx.clone();
        let response_tx = response_tx.clone();
        let cancel_rx = cancel_rx.clone();
        tokio::spawn(async move {
            put_worker(
                &backend,
                &build,
                index,
                primary,
                &handoffs,
                ready_tx,
                response_tx,
                cancel_rx,
            )
            .await;
        });
    }
    drop(ready_tx);
    drop(response_tx);

    let mut writers: Vec<ChunkWriter> = Vec::new();
    let mut class_counts = [0usize; 6];
    let mut responses = 0usize;
    let mut written = false;
    let mut ready_open = true;

    loop {
        tokio::select! {
            resp = response_rx.recv() => {
                let Some(resp) = resp else { break };
                responses += 1;
                let class = resp.status_class() as usize;
                if class < class_counts.len() {
                    class_counts[class] += 1;
                    if class_counts[class] >= quorum {
                        drain_post_quorum(&mut response_rx, replicas - responses).await;
                        let _ = cancel_tx.send(true);
                        return resp;
                    }
                }
                if responses == replicas {
                    let _ = cancel_tx.send(true);
                    return Response::stub(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "the service is currently unavailable",
                    );
                }
            }
            writer = ready_rx.recv(), if ready_open => {
                match writer {
                    Some(w) => writers.push(w),
                    None => ready_open = false,
                }
            }
        }
        if !written && writers.len() >= quorum && writers.len() + responses == replicas {
            // Every replica has chosen: a committed writer or a failure.
            written = true;
            match copy_quorum(src.as_mut(), quorum, &mut writers).await {
                Ok(copied) => debug!(copied, "object body copied to quorum"),
                Err(e) => {
                    error!(%e, "quorum copy failed");
                    let _ = cancel_tx.send(true);
                    return Response::stub(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "the service is currently unavailable",
                    );
                }
            }
            // Close the pipes so the backends finish and report status.
            writers.clear();
        }
    }
    // Workers all exited without any class reaching quorum.
    let _ = cancel_tx.send(true);
    Response::stub(
        StatusCode::SERVICE_UNAVAILABLE,
        "the service is currently unavailable",
    )
}

/// One streaming-PUT replica slot: walk primary then handoffs, building a
/// fresh pipe per attempt, until a response commits.
#[allow(clippy::too_many_arguments)]
async fn put_worker(
    backend: &Arc<dyn BackendClient>,
    build: &Arc<PutBuildFn>,
    index: usize,
    primary: Device,
    handoffs: &Handoffs,
    ready_tx: mpsc::Sender<ChunkWriter>,
    response_tx: mpsc::Sender<Response>,
    cancel: watch::Receiver<bool>,
) {
    let mut last: Option<Response> = None;
    let mut dev = Some(primary);
    while let Some(d) = dev {
        let pipe = put_pipe(ready_tx.clone(), cancel.clone());
        let resp = match build(index, &d, pipe) {
            Ok(req) => match backend.execute(req).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(device = %d, %e, "unable to PUT object");
                    Response::stub(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            },
            Err(e) => {
                error!(device = %d, %e, "unable to create PUT request");
                Response::stub(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        let committed = (200..500).contains(&resp.status().as_u16());
        last = Some(resp);
        if committed {
            break;
        }
        if *cancel.borrow() {
            return;
        }
        dev = handoffs.next();
    }
    let resp = last
        .unwrap_or_else(|| Response::stub(StatusCode::INTERNAL_SERVER_ERROR, "no more nodes to try"));
    let _ = response_tx.send(resp).await;
}
