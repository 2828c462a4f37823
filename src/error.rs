//! Error types for catalog synchronisation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::store::StorageError;

/// Errors that can occur during a catalog sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error during download.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// The mirror manifest could not be parsed.
    #[error("Invalid mirror manifest: {0}")]
    InvalidManifest(#[from] quick_xml::de::DeError),

    /// Error raised by the storage backend. Passed through unmodified.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The decompression utility could not be located.
    #[error("No xz decompressor found (searched {0})")]
    CapabilityUnavailable(String),

    /// The manifest or every mirror failed to download.
    #[error("Download from {url} failed: {source}")]
    Network {
        /// Last URL that was attempted.
        url: String,
        /// Underlying cause of the last failure.
        #[source]
        source: Box<SyncError>,
    },

    /// General snapshot download failure.
    #[error("Snapshot download failed: {0}")]
    DownloadFailed(String),

    /// The decompression utility failed or produced no output.
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// Reading or parsing the decompressed artifact failed mid-stream.
    #[error("Error reading {}: {source}", path.display())]
    StreamIo {
        /// Artifact being imported.
        path: PathBuf,
        /// Underlying read or syntax error.
        #[source]
        source: serde_json::Error,
    },

    /// Cancellation was requested while a transfer was in flight.
    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Wraps `source` as a network failure attributed to `url`.
    pub(crate) fn network(url: impl Into<String>, source: SyncError) -> Self {
        SyncError::Network {
            url: url.into(),
            source: Box::new(source),
        }
    }
}
