//! The Petrel proxy core: coordinated backend request dispatch.
//!
//! A single client account/container/object operation becomes a set of
//! backend HTTP requests across the storage cluster, and the backend replies
//! fold into one client-visible [`Response`]:
//!
//! - **Writes and updates** go through the quorum dispatcher: fan-out to all
//!   primaries, per-replica handoff on failure, and a response representative
//!   of the majority status class.
//! - **Reads** go through the first-response dispatcher: speculative
//!   staggered racing across shuffled primaries, returning the first
//!   acceptable answer.
//! - **Object PUT bodies** stream through a per-replica pipe that honors
//!   `Expect: 100-continue`: the body is copied only once a quorum of
//!   replicas has committed to receiving it.
//!
//! Operations never fail with an error: every dispatch returns a complete
//! [`Response`], synthesizing a stub when no backend round-trip produced one.

mod backend;
mod builder;
mod cache;
mod client;
mod dispatch;
mod error;
mod response;
mod router;
mod stream;

pub mod testing;

pub use backend::{
    BackendBody, BackendClient, BackendRequest, CONNECT_TIMEOUT, CONTROL_REQUEST_TIMEOUT,
    HttpBackend, IDLE_CONNECTION_TIMEOUT, OBJECT_TRANSFER_TIMEOUT,
};
pub use cache::{CONTAINER_INFO_TTL, MemorySharedCache, SharedCache};
pub use client::ProxyClient;
pub use dispatch::{FIRST_RESPONSE_FINAL_TIMEOUT, POST_QUORUM_TIMEOUT, REQUEST_STAGGER};
pub use error::ProxyError;
pub use response::Response;
pub use router::{ObjectBody, ObjectClient};

/// Backend header naming the storage policy an object request targets.
pub const POLICY_INDEX_HEADER: &str = "x-backend-storage-policy-index";
/// Backend header naming the cluster-wide default storage policy.
pub const POLICY_DEFAULT_HEADER: &str = "x-backend-storage-policy-default";
/// Client header selecting a storage policy on container create.
pub const STORAGE_POLICY_HEADER: &str = "x-storage-policy";
