//! Error types for gossip.

/// Errors that can occur in the gossip subsystem.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    /// Sending state to a peer failed.
    #[error("gossip transport error: {0}")]
    Transport(String),

    /// A peer sent state we could not decode.
    #[error("undecodable gossip state: {0}")]
    Decode(#[from] serde_json::Error),

    /// An action could not be dispatched to its node.
    #[error("action dispatch failed: {0}")]
    Dispatch(String),
}
