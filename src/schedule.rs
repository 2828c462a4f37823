//! Decides whether and how the catalog should be updated.

use crate::types::{SyncStatus, UpdateState};
use chrono::{DateTime, TimeZone};
use std::time::Duration;

/// An `UPDATING` status older than this is considered left behind by a
/// crashed run.
pub const STALE_UPDATE: Duration = Duration::from_secs(3 * 60 * 60);

/// What the next run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePlan {
    /// Nothing to do.
    Skip,
    Full,
    Differential,
    /// A previous run stopped while `UPDATING`. The caller marks it
    /// `ABORTED` and plans again.
    ///
    /// Staleness is measured from `modified`, the last status write, not
    /// from `last_update`. Re-planning may start an update in the same run.
    RecoverStale,
}

/// Plans the next update from the persisted `status`.
///
/// Calendar days are compared in the time zone of `now`.
///
/// # Arguments
///
/// * `status` - Persisted sync status
/// * `now` - Current time
/// * `interval` - Minimum time between two updates
/// * `force` - Ignore `interval`
pub fn plan_update<Tz: TimeZone>(
    status: &SyncStatus,
    now: &DateTime<Tz>,
    interval: Duration,
    force: bool,
) -> UpdatePlan {
    let now_secs = now.timestamp();

    if status.state == UpdateState::Updating {
        let idle_for = now_secs.saturating_sub(status.modified);
        return if idle_for > STALE_UPDATE.as_secs() as i64 {
            UpdatePlan::RecoverStale
        } else {
            UpdatePlan::Skip
        };
    }

    let since_update = now_secs.saturating_sub(status.last_update);
    if !force && since_update < interval.as_secs() as i64 {
        return UpdatePlan::Skip;
    }

    let last_day = now
        .timezone()
        .timestamp_opt(status.last_update, 0)
        .single()
        .map(|last| last.date_naive());
    if status.last_update <= 0 || last_day != Some(now.date_naive()) {
        return UpdatePlan::Full;
    }

    if status.state == UpdateState::Aborted && status.full_update {
        return UpdatePlan::Full;
    }

    UpdatePlan::Differential
}
