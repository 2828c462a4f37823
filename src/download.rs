//! Snapshot download with mirror failover.

use crate::error::SyncError;
use crate::progress::Notifier;
use crate::transfer::{copy_chunked, percent_complete};
use crate::types::Mirror;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An opened remote object.
pub struct RemoteFile {
    /// Declared `Content-Length`, if the server sent one.
    pub content_length: Option<u64>,
    /// Body of the response.
    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

/// Network access used by the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches a small document completely into memory.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError>;

    /// Opens a potentially large object for streaming.
    async fn open(&self, url: &str) -> Result<RemoteFile, SyncError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn open(&self, url: &str) -> Result<RemoteFile, SyncError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_length = response.content_length();
        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(RemoteFile {
            content_length,
            body: Box::pin(StreamReader::new(stream)),
        })
    }
}

/// Removes a file if it exists. A missing file is not an error.
pub(crate) async fn remove_stale(path: &Path) -> Result<(), SyncError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Downloads a single URL to `filename`.
///
/// # Arguments
///
/// * `transport` - Transport used for the request
/// * `url` - The URL to download from
/// * `filename` - The local filename to save to
/// * `chunk_size` - Bytes per read
/// * `cancel` - Cooperative cancellation signal
/// * `notifier` - Receives `(percent, url)` once per chunk
///
/// # Returns
///
/// `Ok(())` on a complete download, or an error.
async fn download_file<T: Transport + ?Sized>(
    transport: &T,
    url: &str,
    filename: &Path,
    chunk_size: usize,
    cancel: &CancellationToken,
    notifier: &dyn Notifier,
) -> Result<(), SyncError> {
    // Create parent directory if needed
    if let Some(parent) = filename.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut remote = transport.open(url).await?;
    let content_length = remote.content_length;
    let mut file = BufWriter::new(tokio::fs::File::create(filename).await?);

    copy_chunked(
        &mut remote.body,
        &mut file,
        chunk_size,
        content_length.unwrap_or(0),
        cancel,
        |chunks, size, total| {
            notifier.update_download_progress(percent_complete(chunks, size, total), url)
        },
    )
    .await?;
    file.flush().await?;
    drop(file);

    // Verify file size
    let file_size = tokio::fs::metadata(filename).await?.len();
    if let Some(content_length) = content_length {
        if file_size != content_length {
            return Err(SyncError::IoError(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "File size mismatch for {}: expected {} bytes, got {} bytes",
                    filename.display(),
                    content_length,
                    file_size
                ),
            )));
        }
    } else {
        warn!(
            "Content-Length header was not present for {}. Cannot verify file size.",
            url
        );
    }

    Ok(())
}

/// Downloads the snapshot from the first mirror that succeeds.
///
/// Mirrors are attempted strictly in the given order. Any file left at
/// `dest` is removed before each attempt, so a partial download never
/// survives into decompression.
///
/// # Arguments
///
/// * `transport` - Transport used for the requests
/// * `mirrors` - Mirrors ordered by preference
/// * `dest` - Path of the compressed artifact
/// * `chunk_size` - Bytes per read
/// * `cancel` - Cooperative cancellation signal
/// * `notifier` - Progress sink
///
/// # Returns
///
/// The URL that was downloaded, [`SyncError::Cancelled`], or
/// [`SyncError::Network`] carrying the last attempted URL.
pub async fn download_snapshot<T: Transport + ?Sized>(
    transport: &T,
    mirrors: &[Mirror],
    dest: &Path,
    chunk_size: usize,
    cancel: &CancellationToken,
    notifier: &dyn Notifier,
) -> Result<String, SyncError> {
    let file_display_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("snapshot");

    let mut last_failure: Option<(String, SyncError)> = None;

    for mirror in mirrors {
        remove_stale(dest).await?;

        info!("Trying to download {} from {}...", file_display_name, mirror.url);
        notifier.update_download_progress(0, &mirror.url);

        match download_file(transport, &mirror.url, dest, chunk_size, cancel, notifier).await {
            Ok(()) => {
                info!("✅ Downloaded {} from {}", file_display_name, mirror.url);
                return Ok(mirror.url.clone());
            }
            Err(SyncError::Cancelled) => {
                warn!("Cancellation requested. Aborting download of {}", mirror.url);
                remove_stale(dest).await?;
                return Err(SyncError::Cancelled);
            }
            Err(e) => {
                error!("Failure downloading {}: {}", mirror.url, e);
                last_failure = Some((mirror.url.clone(), e));
            }
        }
    }

    remove_stale(dest).await?;
    Err(match last_failure {
        Some((url, e)) => SyncError::network(url, e),
        None => SyncError::network(
            "",
            SyncError::DownloadFailed("manifest lists no usable mirror".to_string()),
        ),
    })
}
