//! Gossip-based coordination for the erasure-coded pipeline.
//!
//! Peers periodically exchange a JSON state blob (`Friends` / `Todo` /
//! `Done`) over `POST /gossip`. The state drives two things:
//!
//! - **Leader election**: once an hour, every peer wipes its `Friends` map
//!   and re-announces itself under a fresh random 63-bit id. Five minutes of
//!   gossip later the maps have converged, and the peer holding the maximum
//!   id is the leader.
//! - **Reconciliation**: pending [`Action`]s replicate through `Todo`; the
//!   leader dispatches them and marks completions in `Done`, whose
//!   tombstones stop completed work from resurrecting and are garbage
//!   collected after seven days.

mod error;
mod service;
mod state;
mod ticker;

pub use error::GossipError;
pub use service::{
    ActionDispatcher, GossipService, GossipTransport, HttpActionDispatcher, HttpGossipTransport,
    router,
};
pub use state::{
    Action, DONE_TOMBSTONE_TTL, ELECTION_DURATION, ELECTION_FREQUENCY, ELECTION_GOSSIP_FREQUENCY,
    GOSSIP_FREQUENCY, GossipState, GossipView, Peer,
};
pub use ticker::AlignedTicker;
