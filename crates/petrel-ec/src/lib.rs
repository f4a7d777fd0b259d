//! Streaming erasure-coding pipeline.
//!
//! [`ec_split`] chunks a source into windows, Reed-Solomon encodes each
//! window into `k + m` equal fragments, and scatters fragment `i` to writer
//! `i`. [`ec_glue`] is the inverse: it gathers the per-window fragments from
//! `k + m` readers (tolerating up to `m` missing), reconstructs, and writes
//! the original bytes back out.
//!
//! Round-trip identity holds for any input length and valid
//! `(k, m, chunk_size)`: `glue(split(input)) == input`.

mod config;
mod error;
mod glue;
mod split;

pub use config::{CHUNK_SIZE_HEADER, EC_POLICY_HEADER, EcParams, FRAG_INDEX_HEADER};
pub use error::EcError;
pub use glue::ec_glue;
pub use split::ec_split;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

    /// Pipe pairs for wiring split's writers to glue's readers.
    fn pipes(n: usize) -> (Vec<DuplexStream>, Vec<Option<DuplexStream>>) {
        let mut writers = Vec::with_capacity(n);
        let mut readers = Vec::with_capacity(n);
        for _ in 0..n {
            let (w, r) = duplex(64 * 1024);
            writers.push(w);
            readers.push(Some(r));
        }
        (writers, readers)
    }

    async fn round_trip(data: &[u8], k: usize, m: usize, chunk_size: usize, drop_frags: &[usize]) {
        let (mut writers, mut readers) = pipes(k + m);
        for index in drop_frags {
            readers[*index] = None;
        }

        let content_length = data.len() as u64;
        let input = data.to_vec();
        let split_task = tokio::spawn(async move {
            let mut src = &input[..];
            let result = ec_split(k, m, &mut src, chunk_size, content_length, &mut writers).await;
            for w in &mut writers {
                let _ = w.shutdown().await;
            }
            result
        });

        let mut out = Vec::new();
        let mut dsts = [&mut out];
        ec_glue(k, m, &mut readers, chunk_size, content_length, &mut dsts)
            .await
            .unwrap();
        split_task.await.unwrap().unwrap();
        assert_eq!(
            out, data,
            "round trip mismatch for k={k} m={m} chunk={chunk_size} len={}",
            data.len()
        );
    }

    #[tokio::test]
    async fn test_round_trip_alphabet_with_four_missing() {
        // 26 bytes, k=6, m=4, chunk 4: any 4 fragment streams may go missing.
        round_trip(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ", 6, 4, 4, &[0, 3, 7, 9]).await;
    }

    #[tokio::test]
    async fn test_round_trip_prefixes_and_parameters() {
        let alpha = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        for len in [1usize, 5, 13, 25, 26] {
            for chunk_size in 1..6 {
                for (k, m) in [(3, 1), (4, 2), (6, 4), (10, 6), (1, 1)] {
                    round_trip(&alpha[..len], k, m, chunk_size, &[]).await;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_multi_window() {
        // Content much larger than k·chunk_size exercises the window loop.
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        round_trip(&data, 4, 2, 64, &[]).await;
        round_trip(&data, 4, 2, 64, &[1, 4]).await;
    }

    #[tokio::test]
    async fn test_round_trip_tolerates_exactly_m_missing() {
        round_trip(b"tolerate exactly m missing fragments", 5, 3, 3, &[0, 2, 6]).await;
    }

    #[tokio::test]
    async fn test_glue_fails_with_more_than_m_missing() {
        let k = 4;
        let m = 2;
        let data = b"not enough fragments to reconstruct";
        let (mut writers, mut readers) = pipes(k + m);
        // Drop m + 1 streams.
        readers[0] = None;
        readers[2] = None;
        readers[5] = None;

        let content_length = data.len() as u64;
        let input = data.to_vec();
        tokio::spawn(async move {
            let mut src = &input[..];
            let _ = ec_split(k, m, &mut src, 4, content_length, &mut writers).await;
            for w in &mut writers {
                let _ = w.shutdown().await;
            }
        });

        let mut out = Vec::new();
        let mut dsts = [&mut out];
        let err = ec_glue(k, m, &mut readers, 4, content_length, &mut dsts)
            .await
            .unwrap_err();
        assert!(matches!(err, EcError::ReedSolomon(_)));
    }

    #[tokio::test]
    async fn test_split_short_source_errors() {
        let (mut writers, _readers) = pipes(3);
        let mut src = &b"abc"[..];
        // Declared length exceeds what the source can provide.
        let err = ec_split(2, 1, &mut src, 4, 100, &mut writers)
            .await
            .unwrap_err();
        assert!(matches!(err, EcError::ShortRead));
    }

    #[tokio::test]
    async fn test_empty_content_writes_nothing() {
        let (mut writers, mut readers) = pipes(3);
        let mut src = &b""[..];
        ec_split(2, 1, &mut src, 4, 0, &mut writers).await.unwrap();
        let mut out = Vec::new();
        let mut dsts = [&mut out];
        ec_glue(2, 1, &mut readers, 4, 0, &mut dsts).await.unwrap();
        assert!(out.is_empty());
    }
}
