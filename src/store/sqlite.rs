//! SQLite-backed catalog store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{film_hash, CatalogStore, InsertOutcome, StorageError, UpdateTotals};
use crate::record::CatalogRecord;
use crate::types::{CategoryCounts, SyncStatus, UpdateMode, UpdateState};

const AIRED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// State of the update currently running against the store.
struct UpdateRun {
    mode: UpdateMode,
    /// Last channel seen, as (name, id).
    channel: Option<(String, i64)>,
    /// Last show seen, as (channel id, name, id).
    show: Option<(i64, String, i64)>,
}

struct Inner {
    conn: Connection,
    update: Option<UpdateRun>,
}

/// SQLite-backed catalog store.
///
/// Films are keyed by [`film_hash`]. A full update clears the `touched`
/// flag of every film up front; films still untouched at the end are
/// deleted together with shows and channels left empty.
pub struct SqliteStore {
    inner: Mutex<Inner>,
}

impl SqliteStore {
    /// Opens the database at `path`, creating file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner { conn, update: None }),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS channel (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS show (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL REFERENCES channel(id),
                name TEXT NOT NULL,
                UNIQUE(channel_id, name)
            );

            CREATE TABLE IF NOT EXISTS film (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                idhash TEXT NOT NULL UNIQUE,
                show_id INTEGER NOT NULL REFERENCES show(id),
                title TEXT NOT NULL,
                aired TEXT NOT NULL,
                aired_epoch INTEGER NOT NULL,
                duration INTEGER,
                size INTEGER NOT NULL,
                description TEXT NOT NULL,
                website TEXT NOT NULL,
                url_sub TEXT NOT NULL,
                url_video TEXT NOT NULL,
                url_video_sd TEXT NOT NULL,
                url_video_hd TEXT NOT NULL,
                geo TEXT NOT NULL,
                touched INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_film_show ON film(show_id);
            CREATE INDEX IF NOT EXISTS idx_film_touched ON film(touched);
            CREATE INDEX IF NOT EXISTS idx_show_channel ON show(channel_id);

            -- Single row sync status
            CREATE TABLE IF NOT EXISTS status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL,
                description TEXT NOT NULL,
                modified INTEGER NOT NULL,
                last_update INTEGER NOT NULL,
                snapshot_date INTEGER,
                full_update INTEGER NOT NULL,
                added TEXT NOT NULL,
                deleted TEXT NOT NULL,
                total TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }

    fn count(conn: &Connection, table: &str) -> Result<u64, StorageError> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    }

    fn totals(conn: &Connection) -> Result<CategoryCounts, StorageError> {
        Ok(CategoryCounts {
            channels: Self::count(conn, "channel")?,
            shows: Self::count(conn, "show")?,
            movies: Self::count(conn, "film")?,
        })
    }

    fn channel_id(
        conn: &Connection,
        run: &mut UpdateRun,
        name: &str,
        added: &mut CategoryCounts,
    ) -> Result<i64, StorageError> {
        if let Some((cached, id)) = &run.channel {
            if cached == name {
                return Ok(*id);
            }
        }

        let existing: Option<i64> = conn
            .query_row("SELECT id FROM channel WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                conn.execute("INSERT INTO channel (name) VALUES (?1)", params![name])?;
                added.channels += 1;
                conn.last_insert_rowid()
            }
        };

        run.channel = Some((name.to_string(), id));
        Ok(id)
    }

    fn show_id(
        conn: &Connection,
        run: &mut UpdateRun,
        channel_id: i64,
        name: &str,
        added: &mut CategoryCounts,
    ) -> Result<i64, StorageError> {
        if let Some((cached_channel, cached, id)) = &run.show {
            if *cached_channel == channel_id && cached == name {
                return Ok(*id);
            }
        }

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM show WHERE channel_id = ?1 AND name = ?2",
                params![channel_id, name],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                conn.execute(
                    "INSERT INTO show (channel_id, name) VALUES (?1, ?2)",
                    params![channel_id, name],
                )?;
                added.shows += 1;
                conn.last_insert_rowid()
            }
        };

        run.show = Some((channel_id, name.to_string(), id));
        Ok(id)
    }

    fn upsert_film(
        conn: &Connection,
        show_id: i64,
        record: &CatalogRecord,
        added: &mut CategoryCounts,
    ) -> Result<i64, StorageError> {
        let idhash = film_hash(record);
        let aired = record.aired.format(AIRED_FORMAT).to_string();

        let existing: Option<i64> = conn
            .query_row("SELECT id FROM film WHERE idhash = ?1", params![idhash], |row| {
                row.get(0)
            })
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE film SET show_id = ?1, title = ?2, aired = ?3, aired_epoch = ?4,
                         duration = ?5, size = ?6, description = ?7, website = ?8, url_sub = ?9,
                         url_video = ?10, url_video_sd = ?11, url_video_hd = ?12, geo = ?13,
                         touched = 1
                     WHERE id = ?14",
                    params![
                        show_id,
                        record.title,
                        aired,
                        record.aired_epoch,
                        record.duration,
                        record.size as i64,
                        record.description,
                        record.website,
                        record.url_sub,
                        record.url_video,
                        record.url_video_sd,
                        record.url_video_hd,
                        record.geo,
                        id,
                    ],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO film (idhash, show_id, title, aired, aired_epoch, duration, size,
                         description, website, url_sub, url_video, url_video_sd, url_video_hd, geo,
                         touched)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 1)",
                    params![
                        idhash,
                        show_id,
                        record.title,
                        aired,
                        record.aired_epoch,
                        record.duration,
                        record.size as i64,
                        record.description,
                        record.website,
                        record.url_sub,
                        record.url_video,
                        record.url_video_sd,
                        record.url_video_hd,
                        record.geo,
                    ],
                )?;
                added.movies += 1;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    fn delete_untouched(conn: &Connection) -> Result<CategoryCounts, StorageError> {
        let movies = conn.execute("DELETE FROM film WHERE touched = 0", [])?;
        let shows = conn.execute(
            "DELETE FROM show WHERE id NOT IN (SELECT DISTINCT show_id FROM film)",
            [],
        )?;
        let channels = conn.execute(
            "DELETE FROM channel WHERE id NOT IN (SELECT DISTINCT channel_id FROM show)",
            [],
        )?;
        Ok(CategoryCounts {
            channels: channels as u64,
            shows: shows as u64,
            movies: movies as u64,
        })
    }
}

fn counts_to_json(counts: &CategoryCounts) -> Result<String, StorageError> {
    serde_json::to_string(counts).map_err(|e| StorageError::Database(e.to_string()))
}

fn counts_from_json(value: &str) -> CategoryCounts {
    serde_json::from_str(value).unwrap_or_default()
}

impl CatalogStore for SqliteStore {
    fn status(&self) -> Result<SyncStatus, StorageError> {
        let inner = self.lock()?;
        let row = inner
            .conn
            .query_row(
                "SELECT state, description, modified, last_update, snapshot_date, full_update,
                        added, deleted, total
                 FROM status WHERE id = 1",
                [],
                |row| {
                    let state: String = row.get(0)?;
                    let added: String = row.get(6)?;
                    let deleted: String = row.get(7)?;
                    let total: String = row.get(8)?;
                    Ok(SyncStatus {
                        state: state.parse().unwrap_or_else(|e| {
                            warn!("{}, treating as IDLE", e);
                            UpdateState::Idle
                        }),
                        description: row.get(1)?,
                        modified: row.get(2)?,
                        last_update: row.get(3)?,
                        snapshot_date: row.get(4)?,
                        full_update: row.get(5)?,
                        added: counts_from_json(&added),
                        deleted: counts_from_json(&deleted),
                        total: counts_from_json(&total),
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    fn persist_status(&self, status: &SyncStatus) -> Result<(), StorageError> {
        let inner = self.lock()?;
        inner.conn.execute(
            "INSERT OR REPLACE INTO status
                 (id, state, description, modified, last_update, snapshot_date, full_update,
                  added, deleted, total)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                status.state.as_str(),
                status.description,
                status.modified,
                status.last_update,
                status.snapshot_date,
                status.full_update,
                counts_to_json(&status.added)?,
                counts_to_json(&status.deleted)?,
                counts_to_json(&status.total)?,
            ],
        )?;
        Ok(())
    }

    fn begin_update(&self, mode: UpdateMode) -> Result<CategoryCounts, StorageError> {
        let mut inner = self.lock()?;
        if !inner.conn.is_autocommit() {
            warn!("Rolling back unfinished transaction");
            inner.conn.execute_batch("ROLLBACK")?;
        }

        inner.conn.execute_batch("BEGIN")?;
        if mode == UpdateMode::Full {
            inner.conn.execute("UPDATE film SET touched = 0", [])?;
        }
        let before = Self::totals(&inner.conn)?;
        debug!("Begin {:?} update with {}", mode, before);

        inner.update = Some(UpdateRun {
            mode,
            channel: None,
            show: None,
        });
        Ok(before)
    }

    fn insert(&self, record: &CatalogRecord) -> Result<InsertOutcome, StorageError> {
        let mut guard = self.lock()?;
        let Inner { conn, update } = &mut *guard;
        let run = update.as_mut().ok_or(StorageError::NoUpdate)?;

        let mut added = CategoryCounts::default();
        let channel_id = Self::channel_id(conn, run, &record.channel, &mut added)?;
        let show_id = Self::show_id(conn, run, channel_id, &record.show, &mut added)?;
        let record_id = Self::upsert_film(conn, show_id, record, &mut added)?;

        Ok(InsertOutcome { record_id, added })
    }

    fn end_update(&self, aborted: bool) -> Result<UpdateTotals, StorageError> {
        let mut inner = self.lock()?;
        let run = inner.update.take().ok_or(StorageError::NoUpdate)?;

        let deleted = if run.mode == UpdateMode::Full && !aborted {
            Self::delete_untouched(&inner.conn)?
        } else {
            CategoryCounts::default()
        };
        let total = Self::totals(&inner.conn)?;
        inner.conn.execute_batch("COMMIT")?;

        debug!("End update: deleted {}, total {}", deleted, total);
        Ok(UpdateTotals { deleted, total })
    }
}
