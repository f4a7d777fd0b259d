//! The gossip service: periodic exchange, election timing, and the
//! leader's action loop. Also the `/gossip` HTTP surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use petrel_ring::Ring;
use petrel_types::Device;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::GossipError;
use crate::state::{
    Action, ELECTION_DURATION, ELECTION_FREQUENCY, ELECTION_GOSSIP_FREQUENCY, GOSSIP_FREQUENCY,
    GossipState, GossipView,
};
use crate::ticker::AlignedTicker;

/// Transport for pushing serialized state to a peer.
#[async_trait::async_trait]
pub trait GossipTransport: Send + Sync {
    /// Deliver one serialized state blob to `device`.
    async fn send_state(&self, device: &Device, body: Vec<u8>) -> Result<(), GossipError>;
}

/// HTTP transport: `POST {scheme}://host:port/gossip`.
pub struct HttpGossipTransport {
    client: reqwest::Client,
}

impl HttpGossipTransport {
    /// Transport over a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpGossipTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GossipTransport for HttpGossipTransport {
    async fn send_state(&self, device: &Device, body: Vec<u8>) -> Result<(), GossipError> {
        let url = format!("{}://{}/gossip", device.scheme, device.endpoint());
        let resp = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| GossipError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(GossipError::Transport(format!(
                "{url} answered {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Executes one reconciliation action against its source node.
#[async_trait::async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Run `action` on `node`; `Ok` marks the action done.
    async fn dispatch(&self, action: &Action, node: &Device) -> Result<(), GossipError>;
}

/// HTTP dispatcher: a nursery action tells its source node to run a
/// replication pass via `POST /ec-nursery/{device}`.
pub struct HttpActionDispatcher {
    client: reqwest::Client,
}

impl HttpActionDispatcher {
    /// Dispatcher over a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ActionDispatcher for HttpActionDispatcher {
    async fn dispatch(&self, action: &Action, node: &Device) -> Result<(), GossipError> {
        let url = format!(
            "{}://{}/ec-nursery/{}",
            node.scheme,
            node.endpoint(),
            node.device
        );
        debug!(action = %action.name, kind = %action.kind, %url, "dispatching action");
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| GossipError::Dispatch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(GossipError::Dispatch(format!(
                "{url} answered {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Periodic gossip, hourly elections, and the leader's action loop.
pub struct GossipService {
    state: Arc<GossipState>,
    ring: Arc<dyn Ring>,
    transport: Arc<dyn GossipTransport>,
    dispatcher: Arc<dyn ActionDispatcher>,
}

impl GossipService {
    /// Assemble the service.
    pub fn new(
        state: Arc<GossipState>,
        ring: Arc<dyn Ring>,
        transport: Arc<dyn GossipTransport>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        Self {
            state,
            ring,
            transport,
            dispatcher,
        }
    }

    /// The shared gossip state.
    pub fn state(&self) -> &Arc<GossipState> {
        &self.state
    }

    /// Push the current state to one peer, chosen by drawing a random key
    /// per device and taking the maximum.
    pub async fn gossip_once(&self) {
        let mut best: i64 = 0;
        let mut chosen: Option<Device> = None;
        for dev in self.ring.devices() {
            let key: i64 = rand::rng().random_range(0..i64::MAX);
            if key > best {
                best = key;
                chosen = Some(dev);
            }
        }
        let Some(dev) = chosen else { return };
        let body = self.state.serialize();
        if let Err(e) = self.transport.send_state(&dev, body).await {
            debug!(device = %dev, %e, "gossip send failed");
        }
    }

    /// Run the gossip/election loop until `shutdown` fires.
    ///
    /// Elections start on the hour and end five minutes later; gossip runs
    /// once a minute, tightening to every ten seconds while an election is
    /// active. All tickers are wall-clock aligned.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let start_election = AlignedTicker::new(ELECTION_FREQUENCY, Duration::ZERO);
        let end_election = AlignedTicker::new(ELECTION_FREQUENCY, ELECTION_DURATION);
        let gossip = AlignedTicker::new(GOSSIP_FREQUENCY, Duration::ZERO);
        let election_gossip = AlignedTicker::new(ELECTION_GOSSIP_FREQUENCY, Duration::ZERO);

        let mut election_active = false;
        let mut stop_actions: Option<watch::Sender<bool>> = None;
        info!(peer = self.state.self_name(), "gossip service started");

        loop {
            tokio::select! {
                _ = start_election.tick() => {
                    if let Some(stop) = stop_actions.take() {
                        let _ = stop.send(true);
                    }
                    election_active = true;
                    info!("election started");
                    self.state.start_election();
                }
                _ = end_election.tick() => {
                    election_active = false;
                    if self.state.is_leader() {
                        info!("election won, starting action loop");
                        let (stop_tx, stop_rx) = watch::channel(false);
                        stop_actions = Some(stop_tx);
                        let service = self.clone();
                        tokio::spawn(async move {
                            service.do_actions(stop_rx).await;
                        });
                    } else {
                        debug!("election lost");
                    }
                }
                _ = gossip.tick() => self.gossip_once().await,
                _ = election_gossip.tick(), if election_active => self.gossip_once().await,
                _ = shutdown.changed() => {
                    if let Some(stop) = stop_actions.take() {
                        let _ = stop.send(true);
                    }
                    info!("gossip service stopped");
                    return;
                }
            }
        }
    }

    /// Leader action loop: one worker channel per involved node; each
    /// action goes to its *source* node's worker; completions are marked
    /// done (deleting the Todo entry and recording the time).
    pub(crate) async fn do_actions(&self, stop: watch::Receiver<bool>) {
        let actions = self.state.action_list();
        if actions.is_empty() {
            return;
        }
        let devices: HashMap<u64, Device> =
            self.ring.devices().into_iter().map(|d| (d.id, d)).collect();
        let involved: HashSet<u64> = actions
            .iter()
            .flat_map(|a| [a.src, a.dst])
            .collect();

        let mut queues: HashMap<u64, mpsc::Sender<Action>> = HashMap::new();
        let mut workers = Vec::new();
        for id in involved {
            let Some(node) = devices.get(&id) else {
                debug!(node = id, "action references unknown node");
                continue;
            };
            let (queue_tx, mut queue_rx) = mpsc::channel::<Action>(16);
            let node = node.clone();
            let dispatcher = self.dispatcher.clone();
            let state = self.state.clone();
            workers.push(tokio::spawn(async move {
                while let Some(action) = queue_rx.recv().await {
                    match dispatcher.dispatch(&action, &node).await {
                        Ok(()) => state.mark_done(&action.name),
                        Err(e) => debug!(action = %action.name, %e, "action dispatch failed"),
                    }
                }
            }));
            queues.insert(id, queue_tx);
        }

        let mut stop = stop;
        for action in actions {
            if *stop.borrow() {
                break;
            }
            let Some(queue) = queues.get(&action.src) else {
                continue;
            };
            tokio::select! {
                _ = queue.send(action) => {}
                _ = stop.changed() => break,
            }
        }
        drop(queues);
        for worker in workers {
            let _ = worker.await;
        }
    }
}

/// The gossip HTTP surface: `POST /gossip` merges peer state, `GET
/// /gossip` reads the local state out.
pub fn router(state: Arc<GossipState>) -> Router {
    Router::new()
        .route("/gossip", post(receive_gossip).get(read_gossip))
        .with_state(state)
}

async fn receive_gossip(State(state): State<Arc<GossipState>>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<GossipView>(&body) {
        Ok(view) => {
            state.merge(&view);
            StatusCode::OK
        }
        Err(e) => {
            debug!(%e, "undecodable gossip payload");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn read_gossip(State(state): State<Arc<GossipState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.serialize(),
    )
}
