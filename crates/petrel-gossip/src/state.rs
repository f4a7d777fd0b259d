//! Process-wide gossip state and its merge semantics.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Elections are held once per hour.
pub const ELECTION_FREQUENCY: Duration = Duration::from_secs(3600);
/// An election lasts five minutes.
pub const ELECTION_DURATION: Duration = Duration::from_secs(300);
/// Normal gossip cadence.
pub const GOSSIP_FREQUENCY: Duration = Duration::from_secs(60);
/// Gossip cadence while an election is running.
pub const ELECTION_GOSSIP_FREQUENCY: Duration = Duration::from_secs(10);
/// Completed-action tombstones are kept this long.
pub const DONE_TOMBSTONE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// A peer as seen through gossip, carrying its election id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Peer {
    /// Stable peer name.
    pub name: String,
    /// Election id, re-rolled each election.
    pub id: i64,
}

/// A reconciliation step the cluster must take to converge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Action {
    /// Unique action name (also its Todo/Done key).
    pub name: String,
    /// Action type.
    #[serde(rename = "Type")]
    pub kind: String,
    /// Partition the action applies to.
    pub partition: u32,
    /// Source device id.
    pub src: u64,
    /// Destination device id.
    pub dst: u64,
}

/// The wire form of the gossip state: what peers POST to each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GossipView {
    /// Known peers by name.
    pub friends: HashMap<String, Peer>,
    /// Pending actions by name.
    pub todo: HashMap<String, Action>,
    /// Completion times (unix seconds) by action name.
    pub done: HashMap<String, i64>,
}

/// The process-wide gossip state.
///
/// All reads and writes go through one mutex, and holders never block on
/// I/O while holding it: callers snapshot ([`GossipState::view`],
/// [`GossipState::serialize`]) and do their network work outside.
pub struct GossipState {
    inner: Mutex<GossipView>,
    self_name: String,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn random_id() -> i64 {
    // Non-negative 63-bit id.
    rand::rng().random_range(0..i64::MAX)
}

impl GossipState {
    /// Fresh state with a random self name and no peers.
    pub fn new() -> Self {
        Self::with_name(format!("{:016x}", random_id()))
    }

    /// Fresh state under a fixed name (stable across restarts if the
    /// caller persists it).
    pub fn with_name(self_name: String) -> Self {
        Self {
            inner: Mutex::new(GossipView::default()),
            self_name,
        }
    }

    /// This peer's gossip name.
    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    /// Merge a remote peer's state into this one.
    ///
    /// Friends union last-writer-wins; remote Todo entries are adopted
    /// unless already Done; remote Done overrides and deletes matching
    /// Todo; Done tombstones older than seven days are collected.
    pub fn merge(&self, remote: &GossipView) {
        let mut state = self.inner.lock().expect("gossip lock poisoned");
        for (name, peer) in &remote.friends {
            state.friends.insert(name.clone(), peer.clone());
        }
        for (name, action) in &remote.todo {
            if !state.done.contains_key(name) {
                state.todo.insert(name.clone(), action.clone());
            }
        }
        for (name, completed_at) in &remote.done {
            state.done.insert(name.clone(), *completed_at);
            state.todo.remove(name);
        }
        let horizon = unix_now() - DONE_TOMBSTONE_TTL.as_secs() as i64;
        state.done.retain(|_, completed_at| *completed_at >= horizon);
    }

    /// Add a pending action (skipped if already completed).
    pub fn add_action(&self, action: Action) {
        let mut state = self.inner.lock().expect("gossip lock poisoned");
        if !state.done.contains_key(&action.name) {
            state.todo.insert(action.name.clone(), action);
        }
    }

    /// Snapshot of the pending actions.
    pub fn action_list(&self) -> Vec<Action> {
        let state = self.inner.lock().expect("gossip lock poisoned");
        state.todo.values().cloned().collect()
    }

    /// Mark a pending action as completed.
    pub fn mark_done(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        let mut state = self.inner.lock().expect("gossip lock poisoned");
        state.todo.remove(name);
        state.done.insert(name.to_string(), unix_now());
        debug!(action = name, "marked action done");
    }

    /// Begin an election: forget every peer and re-announce self under a
    /// fresh random id.
    pub fn start_election(&self) {
        let mut state = self.inner.lock().expect("gossip lock poisoned");
        state.friends = HashMap::from([(
            self.self_name.clone(),
            Peer {
                name: self.self_name.clone(),
                id: random_id(),
            },
        )]);
    }

    /// Whether this peer holds the maximum id among known friends.
    pub fn is_leader(&self) -> bool {
        let state = self.inner.lock().expect("gossip lock poisoned");
        let Some(own) = state.friends.get(&self.self_name) else {
            return false;
        };
        state.friends.values().all(|peer| peer.id <= own.id)
    }

    /// Snapshot the full state.
    pub fn view(&self) -> GossipView {
        self.inner.lock().expect("gossip lock poisoned").clone()
    }

    /// Serialize the state to its JSON wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let state = self.inner.lock().expect("gossip lock poisoned");
        serde_json::to_vec(&*state).expect("gossip state serializes")
    }

    /// Override this peer's own election id (tests pin ids to make
    /// leadership deterministic).
    pub fn set_self_id(&self, id: i64) {
        let mut state = self.inner.lock().expect("gossip lock poisoned");
        state.friends.insert(
            self.self_name.clone(),
            Peer {
                name: self.self_name.clone(),
                id,
            },
        );
    }
}

impl Default for GossipState {
    fn default() -> Self {
        Self::new()
    }
}
