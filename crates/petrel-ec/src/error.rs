//! Error types for the erasure pipeline.

/// Errors that can occur during split or glue.
#[derive(Debug, thiserror::Error)]
pub enum EcError {
    /// The underlying Reed-Solomon codec failed (including too few
    /// fragments present to reconstruct).
    #[error("reed-solomon error: {0}")]
    ReedSolomon(#[from] reed_solomon_erasure::Error),

    /// The source ended before `content_length` bytes were read.
    #[error("short read from source")]
    ShortRead,

    /// Unusable `(k, m, chunk_size)` combination.
    #[error("invalid erasure parameters: {0}")]
    InvalidParams(String),

    /// The fragment stream slice does not match `k + m`.
    #[error("expected {expected} fragment streams, got {got}")]
    StreamCount {
        /// Required stream count (`k + m`).
        expected: usize,
        /// Streams provided.
        got: usize,
    },
}
