//! Error types for nursery replication.

use std::path::PathBuf;

/// Errors that can occur during a nursery replication pass.
#[derive(Debug, thiserror::Error)]
pub enum NurseryError {
    /// The device has no nursery directory.
    #[error("no nursery at {0}")]
    NoNursery(PathBuf),

    /// Filesystem access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The ring does not hold enough nodes for the entry's policy.
    #[error("not enough nodes: need {needed}, have {available}")]
    NotEnoughNodes {
        /// Required node count (`k + m`).
        needed: usize,
        /// Nodes the ring returned.
        available: usize,
    },

    /// At least one fragment endpoint did not acknowledge.
    #[error("replication failed for entry {0}")]
    ReplicationFailed(String),

    /// The streaming split failed.
    #[error("erasure error: {0}")]
    Ec(#[from] petrel_ec::EcError),
}
