//! Data structures shared across the sync pipeline.

use crate::decompress::XZ_LOCATIONS;
use crate::transfer::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default manifest listing mirrors of the full film list.
pub const FULL_MANIFEST_URL: &str = "https://res.mediathekview.de/akt.xml";

/// Default manifest listing mirrors of the differential film list.
pub const DIFF_MANIFEST_URL: &str = "https://res.mediathekview.de/diff.xml";

/// Configuration for a catalog sync run.
///
/// # Example
///
/// ```
/// use filmsync::SyncConfig;
///
/// let config = SyncConfig {
///     data_dir: "/var/lib/filmsync".into(),
///     ..SyncConfig::default()
/// };
/// assert_eq!(config.chunk_size, 8192);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Manifest URL used for full updates.
    pub full_manifest_url: String,
    /// Manifest URL used for differential updates.
    pub diff_manifest_url: String,
    /// Working directory holding the downloaded and decompressed artifacts.
    pub data_dir: PathBuf,
    /// Locations searched for the `xz` binary, in order.
    pub xz_locations: Vec<PathBuf>,
    /// User supplied path to the `xz` binary, checked after `xz_locations`.
    pub xz_override: Option<PathBuf>,
    /// Size of each read during a download (default: 8192).
    pub chunk_size: usize,
    /// Records between two progress reports (default: 1000).
    pub progress_interval: u64,
    /// Records between two cancellation polls (default: 100).
    pub cancel_poll_interval: u64,
    /// Additional attempts for the manifest fetch (default: 2).
    pub manifest_retries: usize,
    /// Delay between manifest fetch attempts in milliseconds (default: 2000).
    pub manifest_retry_delay_ms: u64,
    /// Keep the artifacts on disk after the run (default: false).
    pub keep_artifacts: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_manifest_url: FULL_MANIFEST_URL.to_string(),
            diff_manifest_url: DIFF_MANIFEST_URL.to_string(),
            data_dir: PathBuf::from(".filmsync"),
            xz_locations: XZ_LOCATIONS.iter().map(PathBuf::from).collect(),
            xz_override: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: 1000,
            cancel_poll_interval: 100,
            manifest_retries: 2,
            manifest_retry_delay_ms: 2000,
            keep_artifacts: false,
        }
    }
}

impl SyncConfig {
    /// Manifest URL for the given update mode.
    pub fn manifest_url(&self, mode: UpdateMode) -> &str {
        match mode {
            UpdateMode::Full => &self.full_manifest_url,
            UpdateMode::Differential => &self.diff_manifest_url,
        }
    }

    /// Path of the compressed artifact for the given update mode.
    pub fn compressed_path(&self, mode: UpdateMode) -> PathBuf {
        self.data_dir.join(format!("{}.xz", mode.artifact_name()))
    }

    /// Path of the decompressed artifact for the given update mode.
    pub fn artifact_path(&self, mode: UpdateMode) -> PathBuf {
        self.data_dir.join(mode.artifact_name())
    }
}

/// Kind of catalog update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Replace the whole catalog; entities missing from the snapshot are deleted.
    Full,
    /// Merge recent changes only; nothing is deleted.
    Differential,
}

impl UpdateMode {
    /// Well-known file name of the decompressed artifact.
    pub fn artifact_name(self) -> &'static str {
        match self {
            UpdateMode::Full => "Filmliste-akt",
            UpdateMode::Differential => "Filmliste-diff",
        }
    }
}

/// Stage control for the sync process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    /// Execute all stages
    All,
    /// Only resolve, download and decompress the snapshot
    DownloadOnly,
    /// Only import an already decompressed snapshot
    ImportOnly,
}

/// A download mirror taken from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub url: String,
    /// Lower value means higher preference.
    pub priority: i64,
}

/// Counters kept per entity category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub channels: u64,
    pub shows: u64,
    pub movies: u64,
}

impl CategoryCounts {
    pub fn is_zero(&self) -> bool {
        self.channels == 0 && self.shows == 0 && self.movies == 0
    }
}

impl std::ops::AddAssign for CategoryCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.channels += rhs.channels;
        self.shows += rhs.shows;
        self.movies += rhs.movies;
    }
}

impl fmt::Display for CategoryCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channels:{}, shows:{}, movies:{}",
            self.channels, self.shows, self.movies
        )
    }
}

/// Lifecycle state of the stored catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateState {
    #[default]
    Idle,
    Updating,
    Aborted,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateState::Idle => "IDLE",
            UpdateState::Updating => "UPDATING",
            UpdateState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(UpdateState::Idle),
            "UPDATING" => Ok(UpdateState::Updating),
            "ABORTED" => Ok(UpdateState::Aborted),
            other => Err(format!("unknown update state '{}'", other)),
        }
    }
}

/// Persisted sync status, written at the start and the end of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: UpdateState,
    /// Human readable description of the last transition.
    pub description: String,
    /// Unix timestamp of the last status write.
    pub modified: i64,
    /// Unix timestamp of the last successfully completed update.
    pub last_update: i64,
    /// Publication timestamp of the last imported snapshot, if known.
    pub snapshot_date: Option<i64>,
    /// Whether the last run was a full update.
    pub full_update: bool,
    pub added: CategoryCounts,
    pub deleted: CategoryCounts,
    pub total: CategoryCounts,
}

/// Counters reported by a finished or aborted import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub records: u64,
    pub added: CategoryCounts,
    pub deleted: CategoryCounts,
    pub total: CategoryCounts,
}

/// Result of a sync run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The snapshot was imported completely.
    Completed(SyncSummary),
    /// Cancellation stopped the run early; storage is marked `ABORTED`
    /// if the import had already started.
    Aborted(SyncSummary),
    /// `ExecutionStage::DownloadOnly` left a decompressed artifact behind.
    Downloaded(PathBuf),
}

/// Snapshot of import progress handed to a [`crate::Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateProgress {
    /// Estimated completion, clamped to 0..=100.
    pub percent: u8,
    pub records: u64,
    pub added: CategoryCounts,
}
