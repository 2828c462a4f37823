//! Chunked stream copy with progress and cancellation hooks.

use crate::error::SyncError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Default chunk size for transfers.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Copies `src` into `dst` in fixed-size chunks.
///
/// Before every read the cancellation token is checked and then
/// `report(chunks_transferred, chunk_size, total_size)` is invoked. Each
/// chunk is written out as soon as it has been read. On cancellation no
/// further reads or writes happen and whatever was written so far stays in
/// `dst`; discarding it is up to the caller.
///
/// # Arguments
///
/// * `src` - Source stream
/// * `dst` - Destination sink
/// * `chunk_size` - Bytes per read (must be non-zero)
/// * `total_size` - Declared size of the source, or 0 if unknown
/// * `cancel` - Cooperative cancellation signal
/// * `report` - Progress hook
///
/// # Returns
///
/// The number of bytes copied, or [`SyncError::Cancelled`].
pub async fn copy_chunked<R, W, F>(
    src: &mut R,
    dst: &mut W,
    chunk_size: usize,
    total_size: u64,
    cancel: &CancellationToken,
    mut report: F,
) -> Result<u64, SyncError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64, usize, u64),
{
    let chunk_size = chunk_size.max(1);
    let mut buffer = vec![0u8; chunk_size];
    let mut chunks = 0u64;
    let mut copied = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        report(chunks, chunk_size, total_size);

        let n = read_chunk(src, &mut buffer).await?;
        if n == 0 {
            dst.flush().await?;
            return Ok(copied);
        }

        dst.write_all(&buffer[..n]).await?;
        chunks += 1;
        copied += n as u64;
    }
}

/// Fills `buffer` from `src`, short only at end of stream.
async fn read_chunk<R>(src: &mut R, buffer: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let n = src.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Converts chunk progress into a percentage, 0 when the total is unknown.
pub fn percent_complete(chunks: u64, chunk_size: usize, total_size: u64) -> u8 {
    if total_size == 0 {
        return 0;
    }
    let done = chunks.saturating_mul(chunk_size as u64);
    (done.saturating_mul(100) / total_size).min(100) as u8
}
