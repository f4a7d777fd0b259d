//! Error types for the proxy core.
//!
//! Dispatch operations never surface these to callers (they fold failures
//! into stub [`Response`](crate::Response)s), but the seams below them,
//! request building, transport and cache parsing, are ordinary fallible
//! functions.

/// Errors that can occur inside the proxy core.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Connection, handshake, or mid-body transport failure. Treated as a
    /// 500-class result and retried via handoff.
    #[error("backend transport error: {0}")]
    Transport(String),

    /// The request for a backend device could not be constructed.
    #[error("unable to build backend request: {0}")]
    RequestBuild(String),

    /// The dispatching operation returned and tore its pipes down.
    #[error("request was cancelled")]
    Cancelled,

    /// Reading the client-supplied source body failed.
    #[error("source read error: {0}")]
    SourceRead(#[from] std::io::Error),

    /// Fewer than a quorum of replica pipes could accept a body chunk.
    #[error("quorum write failed: {live} live pipes, {quorum} required")]
    QuorumWrite {
        /// Pipes still accepting chunks.
        live: usize,
        /// Pipes required for the copy to proceed.
        quorum: usize,
    },

    /// Container info could not be fetched from any backend.
    #[error("{status} error retrieving info for container {account}/{container}")]
    ContainerInfo {
        /// Status of the failed HEAD.
        status: u16,
        /// Account name.
        account: String,
        /// Container name.
        container: String,
    },

    /// A required container-info header was missing or malformed.
    #[error("invalid container info header {header}: {value:?}")]
    InvalidContainerInfo {
        /// Header name.
        header: String,
        /// Observed value, empty when absent.
        value: String,
    },

    /// An object client outlived the proxy that owns the rings.
    #[error("proxy client has shut down")]
    CoreGone,
}
