//! Catalog storage contract.
//!
//! The sync driver only talks to storage through [`CatalogStore`]. The
//! bundled [`SqliteStore`] keeps channels, shows and films in SQLite.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::record::CatalogRecord;
use crate::types::{CategoryCounts, SyncStatus, UpdateMode};
use md5::{Digest, Md5};
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("No update in progress")]
    NoUpdate,
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Result of inserting one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Identifier of the stored film.
    pub record_id: i64,
    /// Entities created by this insert. Channel and show are 0 when they
    /// already existed; movies is 0 when the film was already stored.
    pub added: CategoryCounts,
}

/// Counters returned when an update is finalised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateTotals {
    pub deleted: CategoryCounts,
    pub total: CategoryCounts,
}

/// Trait for catalog storage.
///
/// A single update is driven as `begin_update`, any number of `insert`
/// calls, then exactly one `end_update`. Only one update may run against a
/// store at a time.
pub trait CatalogStore: Send + Sync {
    /// Current persisted status.
    fn status(&self) -> Result<SyncStatus, StorageError>;

    /// Replaces the persisted status.
    fn persist_status(&self, status: &SyncStatus) -> Result<(), StorageError>;

    /// Starts an update and returns the entity counts before it.
    fn begin_update(&self, mode: UpdateMode) -> Result<CategoryCounts, StorageError>;

    /// Stores or refreshes one record.
    fn insert(&self, record: &CatalogRecord) -> Result<InsertOutcome, StorageError>;

    /// Finishes the running update.
    ///
    /// Entities not seen during a full update are deleted unless `aborted`
    /// is set. Deleted counts are zero when nothing was deleted.
    fn end_update(&self, aborted: bool) -> Result<UpdateTotals, StorageError>;
}

/// Natural key of a film: MD5 of `channel:show:url_video`, hex encoded.
pub fn film_hash(record: &CatalogRecord) -> String {
    let mut hasher = Md5::new();
    hasher.update(record.channel.as_bytes());
    hasher.update(b":");
    hasher.update(record.show.as_bytes());
    hasher.update(b":");
    hasher.update(record.url_video.as_bytes());
    format!("{:x}", hasher.finalize())
}
