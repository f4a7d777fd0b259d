//! Erasure-coding parameters and their wire form.

use crate::error::EcError;

/// Fragment PUT header carrying the fragment's index (0..k+m).
pub const FRAG_INDEX_HEADER: &str = "FragIndex";
/// Fragment PUT header carrying the policy as `k/m`.
pub const EC_POLICY_HEADER: &str = "HeckPolicy";
/// Fragment PUT header carrying the chunk size in bytes.
pub const CHUNK_SIZE_HEADER: &str = "ChunkSize";

/// Stable per-policy erasure parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcParams {
    /// Data fragments per window.
    pub k: usize,
    /// Parity fragments per window.
    pub m: usize,
    /// Fragment chunk size in bytes.
    pub chunk_size: usize,
}

impl EcParams {
    /// Fallback parameters for nursery entries that carry no metadata.
    pub const DEFAULT: EcParams = EcParams {
        k: 6,
        m: 4,
        chunk_size: 1 << 20,
    };

    /// Validated parameters.
    pub fn new(k: usize, m: usize, chunk_size: usize) -> Result<Self, EcError> {
        if k == 0 || m == 0 {
            return Err(EcError::InvalidParams(format!(
                "k and m must be positive, got {k}/{m}"
            )));
        }
        if k + m > 256 {
            return Err(EcError::InvalidParams(format!(
                "k + m must not exceed 256, got {}",
                k + m
            )));
        }
        if chunk_size == 0 {
            return Err(EcError::InvalidParams("chunk_size must be positive".to_string()));
        }
        Ok(Self { k, m, chunk_size })
    }

    /// Total fragment count per window.
    pub fn total(&self) -> usize {
        self.k + self.m
    }

    /// Wire form of the policy for the `HeckPolicy` header.
    pub fn policy_header(&self) -> String {
        format!("{}/{}", self.k, self.m)
    }

    /// Parse the `HeckPolicy` wire form (`k/m`).
    pub fn from_policy_header(value: &str, chunk_size: usize) -> Result<Self, EcError> {
        let invalid = || EcError::InvalidParams(format!("bad policy header {value:?}"));
        let (k, m) = value.split_once('/').ok_or_else(invalid)?;
        let k = k.trim().parse().map_err(|_| invalid())?;
        let m = m.trim().parse().map_err(|_| invalid())?;
        Self::new(k, m, chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_header_round_trip() {
        let params = EcParams::new(6, 4, 1 << 20).unwrap();
        assert_eq!(params.policy_header(), "6/4");
        let parsed = EcParams::from_policy_header("6/4", 1 << 20).unwrap();
        assert_eq!(parsed, params);
        assert_eq!(parsed.total(), 10);
    }

    #[test]
    fn test_default_params() {
        assert_eq!(EcParams::DEFAULT.k, 6);
        assert_eq!(EcParams::DEFAULT.m, 4);
        assert_eq!(EcParams::DEFAULT.chunk_size, 1 << 20);
    }

    #[test]
    fn test_rejects_bad_params() {
        assert!(EcParams::new(0, 4, 1).is_err());
        assert!(EcParams::new(6, 0, 1).is_err());
        assert!(EcParams::new(6, 4, 0).is_err());
        assert!(EcParams::new(200, 100, 1).is_err());
        assert!(EcParams::from_policy_header("64", 1).is_err());
        assert!(EcParams::from_policy_header("a/b", 1).is_err());
    }
}
