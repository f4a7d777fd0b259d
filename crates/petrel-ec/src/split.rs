//! Split: chunk a source and scatter encoded fragments.

use reed_solomon_erasure::galois_8::ReedSolomon;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::EcError;

/// Read `content_length` bytes from `src` in windows of up to
/// `k · chunk_size`, encode each window into `k + m` equal fragments, and
/// write fragment `i` to `writers[i]`, all fragments of a window in
/// parallel.
///
/// The final window is zero-padded so it divides evenly into `k` fragments;
/// glue trims the padding back off using `content_length`. A source that
/// ends early surfaces as [`EcError::ShortRead`]. Individual fragment-write
/// failures are not errors here: a dead sink shows up wherever the
/// fragment was headed (a failed PUT, a missing read-side fragment).
pub async fn ec_split<R, W>(
    k: usize,
    m: usize,
    src: &mut R,
    chunk_size: usize,
    content_length: u64,
    writers: &mut [W],
) -> Result<(), EcError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    if writers.len() != k + m {
        return Err(EcError::StreamCount {
            expected: k + m,
            got: writers.len(),
        });
    }
    let rs = ReedSolomon::new(k, m)?;

    let mut total_read: u64 = 0;
    while total_read < content_length {
        let remaining = content_length - total_read;
        let expected = (k * chunk_size).min(remaining as usize);

        let mut window = vec![0u8; expected];
        let read = read_full(src, &mut window).await;
        if read == 0 {
            return Err(EcError::ShortRead);
        }
        total_read += read as u64;
        window.truncate(read);

        // Zero-pad so the window divides evenly into k fragments.
        let frag_size = window.len().div_ceil(k);
        window.resize(frag_size * k, 0);

        let mut shards: Vec<Vec<u8>> = window.chunks(frag_size).map(<[u8]>::to_vec).collect();
        shards.resize(k + m, vec![0u8; frag_size]);
        rs.encode(&mut shards)?;

        trace!(window = read, frag_size, "scattering encoded window");
        let writes = writers
            .iter_mut()
            .zip(shards.iter())
            .map(|(writer, shard)| async move {
                let _ = writer.write_all(shard).await;
            });
        futures::future::join_all(writes).await;
    }
    Ok(())
}

/// Fill as much of `buf` as the source can provide; short on EOF or error.
async fn read_full<R>(src: &mut R, buf: &mut [u8]) -> usize
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    filled
}
