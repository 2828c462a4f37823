//! FilmSync - keeps a local copy of the MediathekView film list in sync
//!
//! This library downloads the published film list from a prioritised set of
//! mirrors, decompresses it with `xz` and streams it record by record into a
//! catalog store, reporting how many channels, shows and films were added
//! and deleted.
//!
//! # Features
//!
//! - **Mirror Failover**: Mirrors are tried in priority order until one succeeds
//! - **Streaming Import**: The film list is never held in memory as a whole
//! - **Full and Differential Updates**: Full lists replace the catalog, diffs merge into it
//! - **Cooperative Cancellation**: Runs stop cleanly and leave an `ABORTED` status
//! - **Progress Tracking**: Real-time progress reporting
//!
//! # Example
//!
//! ```no_run
//! use filmsync::{CatalogSync, ExecutionStage, SqliteStore, SyncConfig, SyncOutcome, UpdateMode};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::new("catalog.db".as_ref())?);
//! let sync = CatalogSync::new(SyncConfig::default(), store);
//!
//! if let SyncOutcome::Completed(summary) = sync.run(UpdateMode::Full, ExecutionStage::All).await? {
//!     println!("{} records imported", summary.records);
//! }
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod decompress;
pub mod download;
pub mod error;
pub mod import;
pub mod manifest;
pub mod orchestrator;
pub mod progress;
pub mod record;
pub mod schedule;
pub mod store;
pub mod transfer;
pub mod types;

pub use download::{HttpTransport, RemoteFile, Transport};
pub use error::SyncError;
pub use orchestrator::CatalogSync;
pub use progress::{ConsoleNotifier, LogNotifier, Notifier};
pub use record::CatalogRecord;
pub use schedule::{plan_update, UpdatePlan};
pub use store::{CatalogStore, InsertOutcome, SqliteStore, StorageError, UpdateTotals};
pub use types::{
    CategoryCounts, ExecutionStage, Mirror, SyncConfig, SyncOutcome, SyncStatus, SyncSummary,
    UpdateMode, UpdateProgress, UpdateState,
};
