//! Progress reporting sinks.

use crate::error::SyncError;
use crate::types::UpdateProgress;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use tracing::{error, info};

/// Receives progress and error reports from the pipeline.
///
/// Calls may arrive from the blocking import thread, hence `Send + Sync`.
pub trait Notifier: Send + Sync {
    fn show_download_progress(&self);
    fn update_download_progress(&self, percent: u8, url: &str);
    fn close_download_progress(&self);

    fn show_update_progress(&self);
    fn update_update_progress(&self, progress: &UpdateProgress);
    fn close_update_progress(&self);

    fn show_missing_extractor_error(&self);
    fn show_download_error(&self, url: &str, error: &SyncError);
    fn show_decompression_error(&self, error: &SyncError);
}

const BAR_TEMPLATE: &str =
    "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}% {msg} | {elapsed_precise} elapsed";

fn percent_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Terminal notifier drawing indicatif progress bars.
#[derive(Default)]
pub struct ConsoleNotifier {
    download: Mutex<Option<ProgressBar>>,
    update: Mutex<Option<ProgressBar>>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(slot: &Mutex<Option<ProgressBar>>, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = slot.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn replace_bar(slot: &Mutex<Option<ProgressBar>>, bar: Option<ProgressBar>) -> Option<ProgressBar> {
        match slot.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, bar),
            Err(_) => None,
        }
    }
}

impl Notifier for ConsoleNotifier {
    fn show_download_progress(&self) {
        let pb = percent_bar("📦 Downloading film list");
        if let Some(old) = Self::replace_bar(&self.download, Some(pb)) {
            old.finish_and_clear();
        }
    }

    fn update_download_progress(&self, percent: u8, url: &str) {
        Self::with_bar(&self.download, |pb| {
            pb.set_position(percent as u64);
            pb.set_message(format!("| ⬇️  {}", url));
        });
    }

    fn close_download_progress(&self) {
        if let Some(pb) = Self::replace_bar(&self.download, None) {
            pb.finish_with_message("✅ Download finished");
        }
    }

    fn show_update_progress(&self) {
        let pb = percent_bar("🔄 Updating catalog");
        if let Some(old) = Self::replace_bar(&self.update, Some(pb)) {
            old.finish_and_clear();
        }
    }

    fn update_update_progress(&self, progress: &UpdateProgress) {
        Self::with_bar(&self.update, |pb| {
            pb.set_position(progress.percent as u64);
            pb.set_message(format!(
                "| {} records, {}",
                progress.records, progress.added
            ));
        });
    }

    fn close_update_progress(&self) {
        if let Some(pb) = Self::replace_bar(&self.update, None) {
            pb.finish_with_message("✅ Catalog update finished");
        }
    }

    fn show_missing_extractor_error(&self) {
        eprintln!("❌ No xz decompressor available. Install xz or pass --xz <path>.");
    }

    fn show_download_error(&self, url: &str, error: &SyncError) {
        eprintln!("❌ Download of {} failed: {}", url, error);
    }

    fn show_decompression_error(&self, error: &SyncError) {
        eprintln!("❌ {}", error);
    }
}

/// Notifier that only writes log lines. Used when stderr is not a terminal.
///
/// Download progress is logged in steps of ten percent.
#[derive(Debug, Default)]
pub struct LogNotifier {
    last_percent: AtomicU8,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for LogNotifier {
    fn show_download_progress(&self) {
        self.last_percent.store(0, Ordering::Relaxed);
        info!("Download started");
    }

    fn update_download_progress(&self, percent: u8, url: &str) {
        let last = self.last_percent.load(Ordering::Relaxed);
        if percent == 0 && last != 0 {
            // new mirror
            self.last_percent.store(0, Ordering::Relaxed);
        } else if percent >= last.saturating_add(10) {
            self.last_percent.store(percent, Ordering::Relaxed);
            info!("Download {}%: {}", percent, url);
        }
    }

    fn close_download_progress(&self) {
        info!("Download finished");
    }

    fn show_update_progress(&self) {
        info!("Catalog update started");
    }

    fn update_update_progress(&self, progress: &UpdateProgress) {
        info!(
            "Catalog update {}%: {} records, {}",
            progress.percent, progress.records, progress.added
        );
    }

    fn close_update_progress(&self) {
        info!("Catalog update finished");
    }

    fn show_missing_extractor_error(&self) {
        error!("No xz decompressor available");
    }

    fn show_download_error(&self, url: &str, error: &SyncError) {
        error!("Download of {} failed: {}", url, error);
    }

    fn show_decompression_error(&self, error: &SyncError) {
        error!("{}", error);
    }
}
