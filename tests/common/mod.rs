//! Common test utilities for pipeline tests with mocks.
//!
//! Provides a scripted transport, a notifier that records every call and a
//! store wrapper that counts storage calls and can trip cancellation or fail
//! after a given number of inserts.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use filmsync::{
    CatalogRecord, CatalogStore, CategoryCounts, InsertOutcome, Notifier, RemoteFile,
    SqliteStore, StorageError, SyncError, SyncStatus, Transport, UpdateMode, UpdateProgress,
    UpdateTotals,
};

/// Transport serving in-memory documents.
///
/// Clones share state, so a test can keep one handle for assertions.
#[derive(Clone, Default)]
pub struct MockTransport {
    documents: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` at `url`.
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    /// Makes every request to `url` fail.
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Every requested URL, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        self.attempts.lock().unwrap().push(url.to_string());
        if self.failing.lock().unwrap().contains(url) {
            return Err(SyncError::DownloadFailed(format!("connection refused: {}", url)));
        }
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SyncError::DownloadFailed(format!("404 Not Found: {}", url)))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        self.lookup(url)
    }

    async fn open(&self, url: &str) -> Result<RemoteFile, SyncError> {
        let body = self.lookup(url)?;
        Ok(RemoteFile {
            content_length: Some(body.len() as u64),
            body: Box::pin(std::io::Cursor::new(body)),
        })
    }
}

/// Notifier that records the name of every call.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == name).count()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl Notifier for RecordingNotifier {
    fn show_download_progress(&self) {
        self.push("show_download_progress");
    }

    fn update_download_progress(&self, _percent: u8, _url: &str) {
        self.push("update_download_progress");
    }

    fn close_download_progress(&self) {
        self.push("close_download_progress");
    }

    fn show_update_progress(&self) {
        self.push("show_update_progress");
    }

    fn update_update_progress(&self, _progress: &UpdateProgress) {
        self.push("update_update_progress");
    }

    fn close_update_progress(&self) {
        self.push("close_update_progress");
    }

    fn show_missing_extractor_error(&self) {
        self.push("show_missing_extractor_error");
    }

    fn show_download_error(&self, _url: &str, _error: &SyncError) {
        self.push("show_download_error");
    }

    fn show_decompression_error(&self, _error: &SyncError) {
        self.push("show_decompression_error");
    }
}

/// In-memory SQLite store that counts calls.
pub struct CountingStore {
    inner: SqliteStore,
    inserts: AtomicU64,
    status_writes: AtomicU64,
    begins: AtomicU64,
    ends: Mutex<Vec<bool>>,
    cancel_after: Option<(u64, CancellationToken)>,
    fail_at: Option<u64>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().expect("Failed to create in-memory store"),
            inserts: AtomicU64::new(0),
            status_writes: AtomicU64::new(0),
            begins: AtomicU64::new(0),
            ends: Mutex::new(Vec::new()),
            cancel_after: None,
            fail_at: None,
        }
    }

    /// Cancels `token` once `records` inserts have been made.
    pub fn cancelling_after(records: u64, token: CancellationToken) -> Self {
        Self {
            cancel_after: Some((records, token)),
            ..Self::new()
        }
    }

    /// Fails the `record`th insert with a database error.
    pub fn failing_insert(record: u64) -> Self {
        Self {
            fail_at: Some(record),
            ..Self::new()
        }
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> u64 {
        self.begins.load(Ordering::SeqCst)
    }

    /// `aborted` argument of every `end_update` call.
    pub fn ends(&self) -> Vec<bool> {
        self.ends.lock().unwrap().clone()
    }

    /// True when no storage call has been made.
    pub fn untouched(&self) -> bool {
        self.inserts() == 0
            && self.status_writes() == 0
            && self.begins() == 0
            && self.ends().is_empty()
    }
}

impl CatalogStore for CountingStore {
    fn status(&self) -> Result<SyncStatus, StorageError> {
        self.inner.status()
    }

    fn persist_status(&self, status: &SyncStatus) -> Result<(), StorageError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.persist_status(status)
    }

    fn begin_update(&self, mode: UpdateMode) -> Result<CategoryCounts, StorageError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin_update(mode)
    }

    fn insert(&self, record: &CatalogRecord) -> Result<InsertOutcome, StorageError> {
        if self.fail_at == Some(self.inserts() + 1) {
            return Err(StorageError::Database("disk full".to_string()));
        }
        let outcome = self.inner.insert(record)?;
        let count = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if count == *after {
                token.cancel();
            }
        }
        Ok(outcome)
    }

    fn end_update(&self, aborted: bool) -> Result<UpdateTotals, StorageError> {
        self.ends.lock().unwrap().push(aborted);
        self.inner.end_update(aborted)
    }
}

/// Manifest document listing `mirrors` as (url, priority).
pub fn manifest(mirrors: &[(&str, i64)]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Mirrors>"#);
    for (url, prio) in mirrors {
        xml.push_str(&format!(
            "<Server><URL>{}</URL><Prio>{}</Prio></Server>",
            url, prio
        ));
    }
    xml.push_str("</Mirrors>");
    xml
}

/// Film list with `records` films spread over three channels and ten shows.
pub fn film_list(records: usize) -> String {
    let channels = ["ARD", "ZDF", "3Sat"];
    let mut doc = String::from(
        r#"{"Filmliste":["19.10.2026, 08:15","19.10.2026, 06:15","3","MSearch","hash"],"Filmliste":["Sender","Thema","Titel"]"#,
    );
    for i in 0..records {
        let channel = channels[i % channels.len()];
        let show = format!("Show {}", i % 10);
        let url = format!("http://media.example/{}/{}.mp4", channel, i);
        doc.push_str(&format!(
            r#","X":["{}","{}","Episode {}","18.10.2026","20:15:00","00:45:00","500","Description {}","{}","http://{}.example","","","","","","","1792354500","","DE-AT-CH"]"#,
            channel, show, i, i, url, channel
        ));
    }
    doc.push('}');
    doc
}

/// Shell script standing in for `xz -d`: strips the `.xz` extension.
#[cfg(unix)]
pub fn fake_xz(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-xz");
    std::fs::write(&path, "#!/bin/sh\nmv \"$2\" \"${2%.xz}\"\n").expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
    path
}
