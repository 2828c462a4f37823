//! Main orchestration logic for a catalog sync run.

use crate::decompress::{capability_unavailable, decompress, locate_in};
use crate::download::{download_snapshot, remove_stale, HttpTransport, Transport};
use crate::error::SyncError;
use crate::import::import_file;
use crate::manifest::resolve_mirrors;
use crate::progress::{LogNotifier, Notifier};
use crate::store::CatalogStore;
use crate::types::{ExecutionStage, SyncConfig, SyncOutcome, SyncSummary, UpdateMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives a sync run against one store.
///
/// Only one run may be active per store at a time.
///
/// # Example
///
/// ```no_run
/// use filmsync::{CatalogSync, ExecutionStage, SqliteStore, SyncConfig, UpdateMode};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(SqliteStore::new("catalog.db".as_ref())?);
/// let sync = CatalogSync::new(SyncConfig::default(), store);
/// sync.run(UpdateMode::Full, ExecutionStage::All).await?;
/// # Ok(())
/// # }
/// ```
pub struct CatalogSync<S: ?Sized, T = HttpTransport> {
    config: SyncConfig,
    store: Arc<S>,
    transport: T,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
}

impl<S: CatalogStore + ?Sized + 'static> CatalogSync<S, HttpTransport> {
    /// Creates a run over HTTP that reports through the log.
    pub fn new(config: SyncConfig, store: Arc<S>) -> Self {
        Self {
            config,
            store,
            transport: HttpTransport::new(),
            notifier: Arc::new(LogNotifier::new()),
            cancel: CancellationToken::new(),
        }
    }
}

impl<S: CatalogStore + ?Sized + 'static, T: Transport> CatalogSync<S, T> {
    pub fn with_transport<U: Transport>(self, transport: U) -> CatalogSync<S, U> {
        CatalogSync {
            config: self.config,
            store: self.store,
            transport,
            notifier: self.notifier,
            cancel: self.cancel,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Uses `cancel` as the cancellation signal of this run.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Runs the pipeline for `mode`, limited to `stage`.
    ///
    /// 1. Checks that an `xz` decompressor exists
    /// 2. Resolves the mirrors and downloads the snapshot
    /// 3. Decompresses it
    /// 4. Imports it into the store
    ///
    /// Storage is not touched before step 4. Cancellation is not an error:
    /// it returns [`SyncOutcome::Aborted`].
    pub async fn run(&self, mode: UpdateMode, stage: ExecutionStage) -> Result<SyncOutcome, SyncError> {
        let start = Instant::now();

        let artifact = if stage == ExecutionStage::ImportOnly {
            self.config.artifact_path(mode)
        } else {
            match self.fetch(mode).await? {
                Some(path) => path,
                None => {
                    warn!("Sync cancelled before the import started");
                    return Ok(SyncOutcome::Aborted(SyncSummary::default()));
                }
            }
        };

        if stage == ExecutionStage::DownloadOnly {
            info!("Snapshot ready at {}", artifact.display());
            return Ok(SyncOutcome::Downloaded(artifact));
        }

        let outcome = self.import(artifact.clone(), mode).await;

        if !self.config.keep_artifacts {
            self.cleanup(&artifact).await;
        }

        let elapsed = Duration::from_secs(start.elapsed().as_secs());
        info!("Sync finished in {}", humantime::format_duration(elapsed));
        outcome
    }

    /// Downloads and decompresses the snapshot for `mode`.
    ///
    /// Returns `None` when cancelled during the download.
    async fn fetch(&self, mode: UpdateMode) -> Result<Option<PathBuf>, SyncError> {
        let locations = &self.config.xz_locations;
        let override_path = self.config.xz_override.as_deref();
        let xz = match locate_in(locations, override_path) {
            Some(path) => path,
            None => {
                self.notifier.show_missing_extractor_error();
                return Err(capability_unavailable(locations, override_path));
            }
        };
        debug!("Using decompressor {}", xz.display());

        let compressed = self.config.compressed_path(mode);
        tokio::fs::create_dir_all(&self.config.data_dir).await?;
        remove_stale(&compressed).await?;
        remove_stale(&self.config.artifact_path(mode)).await?;

        self.notifier.show_download_progress();

        let manifest_url = self.config.manifest_url(mode);
        let mirrors = match resolve_mirrors(
            &self.transport,
            manifest_url,
            self.config.manifest_retries,
            self.config.manifest_retry_delay_ms,
        )
        .await
        {
            Ok(mirrors) => mirrors,
            Err(e) => {
                self.notifier.close_download_progress();
                self.notifier.show_download_error(manifest_url, &e);
                return Err(e);
            }
        };
        info!("Found {} mirrors", mirrors.len());

        let downloaded = download_snapshot(
            &self.transport,
            &mirrors,
            &compressed,
            self.config.chunk_size,
            &self.cancel,
            self.notifier.as_ref(),
        )
        .await;
        self.notifier.close_download_progress();

        match downloaded {
            Ok(url) => debug!("Snapshot taken from {}", url),
            Err(SyncError::Cancelled) => return Ok(None),
            Err(e) => {
                let url = match &e {
                    SyncError::Network { url, .. } => url.clone(),
                    _ => manifest_url.to_string(),
                };
                self.notifier.show_download_error(&url, &e);
                return Err(e);
            }
        }

        match decompress(&xz, &compressed).await {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                self.cleanup(&compressed).await;
                self.notifier.show_decompression_error(&e);
                Err(e)
            }
        }
    }

    async fn cleanup(&self, path: &Path) {
        if let Err(e) = remove_stale(path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }

    /// Runs the blocking import on the blocking thread pool.
    async fn import(&self, artifact: PathBuf, mode: UpdateMode) -> Result<SyncOutcome, SyncError> {
        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        let cancel = self.cancel.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            import_file(
                store.as_ref(),
                &artifact,
                mode,
                &config,
                &cancel,
                notifier.as_ref(),
            )
        })
        .await
        .map_err(|e| SyncError::IoError(std::io::Error::other(format!("Task join error: {}", e))))?
    }
}
