//! Streams a decompressed film list into a [`CatalogStore`].
//!
//! This is the blocking half of a sync run. It owns status persistence for
//! the import: `UPDATING` before the storage transaction starts, then
//! `IDLE` or `ABORTED` once it is finalised.

use std::fs::File;
use std::io::BufReader;
use std::ops::ControlFlow;
use std::path::Path;

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decoder::{Decoded, RecordDecoder, TokenReader};
use crate::error::SyncError;
use crate::progress::Notifier;
use crate::store::{CatalogStore, UpdateTotals};
use crate::types::{
    CategoryCounts, SyncConfig, SyncOutcome, SyncStatus, SyncSummary, UpdateMode, UpdateProgress,
    UpdateState,
};

/// Records assumed for a full list when the store is empty.
pub const FALLBACK_ESTIMATE: u64 = 220_000;

/// Added to the stored film count when estimating a full list.
pub const ESTIMATE_MARGIN: u64 = 10_000;

/// Average encoded size of one record in a differential list.
const DIFF_RECORD_BYTES: u64 = 700;

/// Estimates how many records a film list holds. Only used for progress.
pub fn estimate_records(mode: UpdateMode, baseline: &CategoryCounts, file_size: u64) -> u64 {
    match mode {
        UpdateMode::Full if baseline.movies > 0 => baseline.movies + ESTIMATE_MARGIN,
        UpdateMode::Full => FALLBACK_ESTIMATE,
        UpdateMode::Differential => (file_size / DIFF_RECORD_BYTES).max(1),
    }
}

/// Progress in percent, never above 100.
pub fn percent_of(records: u64, estimate: u64) -> u8 {
    if estimate == 0 {
        return 100;
    }
    (records.saturating_mul(100) / estimate).min(100) as u8
}

/// Counters of a run in progress.
#[derive(Debug, Default)]
struct RunState {
    records: u64,
    added: CategoryCounts,
    published: Option<NaiveDateTime>,
}

/// Imports the film list at `path`.
///
/// Cancellation is polled every `config.cancel_poll_interval` records and
/// progress is reported every `config.progress_interval` records.
///
/// # Returns
///
/// * `SyncOutcome::Completed` when the whole list was imported
/// * `SyncOutcome::Aborted` when `cancel` stopped the import
/// * `SyncError::StreamIo` when the list could not be read to the end; the
///   status is `ABORTED` with the cause in its description
/// * Storage errors unmodified; once the update has begun the status is
///   `ABORTED` with the cause in its description
pub fn import_file<S: CatalogStore + ?Sized>(
    store: &S,
    path: &Path,
    mode: UpdateMode,
    config: &SyncConfig,
    cancel: &CancellationToken,
    notifier: &dyn Notifier,
) -> Result<SyncOutcome, SyncError> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let prior = store.status()?;

    store.persist_status(&SyncStatus {
        state: UpdateState::Updating,
        description: "Update in progress".to_string(),
        modified: Utc::now().timestamp(),
        full_update: mode == UpdateMode::Full,
        ..prior.clone()
    })?;

    let baseline = store.begin_update(mode)?;
    let estimate = estimate_records(mode, &baseline, file_size);
    info!(
        "Importing {} ({} bytes, about {} records)",
        path.display(),
        file_size,
        estimate
    );

    notifier.show_update_progress();

    let progress_interval = config.progress_interval.max(1);
    let poll_interval = config.cancel_poll_interval.max(1);
    let mut run = RunState::default();
    let mut decoder = RecordDecoder::new();

    let flow = TokenReader::new(BufReader::new(file), path).for_each(|token| {
        match decoder.feed(token) {
            Some(Decoded::Published(date)) => {
                debug!("Film list published {}", date);
                run.published = Some(date);
            }
            Some(Decoded::Record(record)) => {
                run.added += store.insert(&record)?.added;
                run.records += 1;

                if run.records % progress_interval == 0 {
                    let progress = UpdateProgress {
                        percent: percent_of(run.records, estimate),
                        records: run.records,
                        added: run.added,
                    };
                    debug!("Imported {} records, {}", run.records, run.added);
                    notifier.update_update_progress(&progress);
                }

                if run.records % poll_interval == 0 && cancel.is_cancelled() {
                    return Ok(ControlFlow::Break(()));
                }
            }
            None => {}
        }
        Ok(ControlFlow::Continue(()))
    });

    let outcome = match flow {
        Ok(ControlFlow::Continue(())) => {
            let description = "Update completed".to_string();
            finish(store, mode, &prior, &run, false, description).map(SyncOutcome::Completed)
        }
        Ok(ControlFlow::Break(())) => {
            warn!("Update cancelled after {} records", run.records);
            let description = "Update aborted by user".to_string();
            finish(store, mode, &prior, &run, true, description).map(SyncOutcome::Aborted)
        }
        Err(e @ SyncError::StreamIo { .. }) => {
            warn!("{}", e);
            let description = format!("Update aborted: {}", e);
            finish(store, mode, &prior, &run, true, description).and(Err(e))
        }
        Err(e) => {
            warn!("Update failed after {} records: {}", run.records, e);
            abandon(store, mode, &prior, &run, &e);
            Err(e)
        }
    };

    notifier.close_update_progress();
    outcome
}

/// Finalises the storage update and persists the closing status.
fn finish<S: CatalogStore + ?Sized>(
    store: &S,
    mode: UpdateMode,
    prior: &SyncStatus,
    run: &RunState,
    aborted: bool,
    description: String,
) -> Result<SyncSummary, SyncError> {
    let totals = store.end_update(aborted)?;
    let now = Utc::now().timestamp();

    let (state, last_update, snapshot_date) = if aborted {
        (UpdateState::Aborted, prior.last_update, prior.snapshot_date)
    } else {
        // the list header carries local time
        let published = run
            .published
            .and_then(|date| Local.from_local_datetime(&date).earliest())
            .map(|date| date.timestamp());
        (UpdateState::Idle, now, published.or(prior.snapshot_date))
    };

    store.persist_status(&SyncStatus {
        state,
        description,
        modified: now,
        last_update,
        snapshot_date,
        full_update: mode == UpdateMode::Full,
        added: run.added,
        deleted: totals.deleted,
        total: totals.total,
    })?;

    info!("Records: {}", run.records);
    info!("Added: {}", run.added);
    info!("Deleted: {}", totals.deleted);
    info!("Total: {}", totals.total);

    Ok(SyncSummary {
        records: run.records,
        added: run.added,
        deleted: totals.deleted,
        total: totals.total,
    })
}

/// Best-effort finalisation after a storage failure.
///
/// Ends the update as aborted and persists `ABORTED` with `error` in the
/// description. Failures of either call are only logged so the caller can
/// return `error` unchanged.
fn abandon<S: CatalogStore + ?Sized>(
    store: &S,
    mode: UpdateMode,
    prior: &SyncStatus,
    run: &RunState,
    error: &SyncError,
) {
    let totals = match store.end_update(true) {
        Ok(totals) => totals,
        Err(e) => {
            warn!("Could not end aborted update: {}", e);
            UpdateTotals {
                deleted: CategoryCounts::default(),
                total: prior.total,
            }
        }
    };

    let status = SyncStatus {
        state: UpdateState::Aborted,
        description: format!("Update aborted: {}", error),
        modified: Utc::now().timestamp(),
        last_update: prior.last_update,
        snapshot_date: prior.snapshot_date,
        full_update: mode == UpdateMode::Full,
        added: run.added,
        deleted: totals.deleted,
        total: totals.total,
    };
    if let Err(e) = store.persist_status(&status) {
        warn!("Could not persist aborted status: {}", e);
    }
}
