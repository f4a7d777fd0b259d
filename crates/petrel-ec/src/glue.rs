//! Glue: gather fragments, reconstruct, and reassemble the original bytes.

use reed_solomon_erasure::galois_8::ReedSolomon;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::EcError;

/// Reassemble `content_length` bytes from `k + m` fragment readers.
///
/// Per window, the expected fragment size is read from every live reader in
/// parallel; a reader that fails mid-stream is marked dead (`None`) and
/// reconstruction proceeds from the survivors. At least `k` fragments must
/// be present per window, so up to `m` missing readers are tolerated. The
/// reconstructed data fragments are written to every destination, with the
/// final window's zero padding trimmed to `content_length`.
pub async fn ec_glue<R, W>(
    k: usize,
    m: usize,
    sources: &mut [Option<R>],
    chunk_size: usize,
    content_length: u64,
    dsts: &mut [W],
) -> Result<(), EcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if sources.len() != k + m {
        return Err(EcError::StreamCount {
            expected: k + m,
            got: sources.len(),
        });
    }
    let rs = ReedSolomon::new(k, m)?;

    let mut total_written: u64 = 0;
    while total_written < content_length {
        let remaining = content_length - total_written;
        let expected_frag = if remaining < (chunk_size * k) as u64 {
            (remaining as usize).div_ceil(k)
        } else {
            chunk_size
        };

        let reads = sources.iter_mut().map(|slot| async move {
            match slot {
                Some(reader) => {
                    let mut buf = vec![0u8; expected_frag];
                    match reader.read_exact(&mut buf).await {
                        Ok(_) => Some(buf),
                        Err(_) => {
                            *slot = None;
                            None
                        }
                    }
                }
                None => None,
            }
        });
        let mut shards: Vec<Option<Vec<u8>>> = futures::future::join_all(reads).await;
        let present = shards.iter().filter(|s| s.is_some()).count();
        trace!(present, expected_frag, "reconstructing window");
        rs.reconstruct(&mut shards)?;

        for shard in shards.iter().take(k) {
            let shard = shard.as_deref().expect("data fragment present after reconstruct");
            let remaining = (content_length - total_written) as usize;
            let data = if remaining < shard.len() {
                // Strip the split step's zero padding.
                &shard[..remaining]
            } else {
                shard
            };
            let writes = dsts.iter_mut().map(|dst| async move {
                let _ = dst.write_all(data).await;
            });
            futures::future::join_all(writes).await;
            total_written += data.len() as u64;
        }
    }
    Ok(())
}
