//! Frame store.
//!
//! A store is a directory holding one SQLite database whose `frames` table is
//! a `WITHOUT ROWID` B-tree keyed by frame key, i.e. a durable ordered map from
//! key to encoded frame bytes.
//!
//! - `FrameWriter` owns the only write connection. Inserts never overwrite and
//!   are committed in chunks of `commit_every` rows.
//! - `FrameReader` opens the database immutable and read-only: no locks are
//!   taken, the memory map is disabled and the page cache is bounded, so any
//!   number of readers can run side by side without reading ahead.
//! - `StoreHandle` is the explicit `Unopened` / `ReaderOpen` / `WriterOpen`
//!   state owned by the data engine.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{DataError, Result};
use crate::key::{sort_keys, FrameKey};

/// Database file inside the store directory.
pub const DB_FILE: &str = "frames.db";

/// Inserts per write transaction.
pub const DEFAULT_COMMIT_EVERY: usize = 1000;

/// Default upper bound on the database size (1 TiB).
pub const DEFAULT_CAPACITY_BYTES: u64 = 1 << 40;

const READER_CACHE_KIB: i64 = 2048;

/// Counters reported when a writer is finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub inserted: u64,
    pub skipped: u64,
    pub commits: u64,
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

pub struct FrameWriter {
    path: PathBuf,
    conn: Connection,
    capacity_bytes: u64,
    commit_every: usize,
    pending: usize,
    in_txn: bool,
    stats: WriteStats,
}

impl FrameWriter {
    /// Create a new store at `path`. The directory must not exist yet.
    pub fn open(path: &Path, capacity_bytes: u64) -> Result<Self> {
        if path.exists() {
            return Err(DataError::StoreAlreadyExists {
                path: path.to_path_buf(),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(path)?;
        log::info!("creating frame store at {}", path.display());
        Self::connect(path, capacity_bytes)
    }

    /// Reopen an existing store for writing. Existing keys are left untouched.
    pub fn resume(path: &Path, capacity_bytes: u64) -> Result<Self> {
        if !path.join(DB_FILE).is_file() {
            return Err(DataError::StoreNotFound {
                path: path.to_path_buf(),
            });
        }
        log::info!("resuming frame store at {}", path.display());
        Self::connect(path, capacity_bytes)
    }

    fn connect(path: &Path, capacity_bytes: u64) -> Result<Self> {
        let conn = Connection::open(path.join(DB_FILE))?;
        conn.pragma_update(None, "journal_mode", "DELETE")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
        let max_pages = (capacity_bytes / page_size.max(1) as u64).max(1);
        conn.pragma_update(None, "max_page_count", max_pages as i64)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS frames (
              key TEXT PRIMARY KEY NOT NULL,
              value BLOB NOT NULL
            ) WITHOUT ROWID;
            "#,
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
            capacity_bytes,
            commit_every: DEFAULT_COMMIT_EVERY,
            pending: 0,
            in_txn: false,
            stats: WriteStats::default(),
        })
    }

    pub fn with_commit_every(mut self, commit_every: usize) -> Self {
        self.commit_every = commit_every.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Rows inserted by this writer that are already durable.
    pub fn committed(&self) -> u64 {
        self.stats.inserted - self.pending as u64
    }

    /// Insert `bytes` under `key` unless the key is already present.
    ///
    /// Returns `true` when a row was written.
    pub fn put(&mut self, key: &str, bytes: &[u8]) -> Result<bool> {
        if !self.in_txn {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_txn = true;
        }
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO frames(key, value) VALUES (?1, ?2)",
                params![key, bytes],
            )
            .map_err(|e| self.map_full(e))?;

        if changed == 0 {
            log::warn!("frame {} already present, skipping", key);
            self.stats.skipped += 1;
            return Ok(false);
        }

        self.stats.inserted += 1;
        self.pending += 1;
        if self.pending >= self.commit_every {
            self.commit()?;
        }
        Ok(true)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        contains_key(&self.conn, key)
    }

    /// Commit the open transaction, if any.
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_txn {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| self.map_full(e))?;
        self.in_txn = false;
        self.stats.commits += 1;
        log::debug!(
            "committed {} frames to {} (commit #{})",
            self.pending,
            self.path.display(),
            self.stats.commits
        );
        self.pending = 0;
        Ok(())
    }

    /// Commit the tail and close the writer.
    pub fn finish(mut self) -> Result<WriteStats> {
        self.commit()?;
        Ok(self.stats)
    }

    fn map_full(&self, err: rusqlite::Error) -> DataError {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::DiskFull => {
                DataError::StoreFull {
                    path: self.path.clone(),
                    capacity_bytes: self.capacity_bytes,
                }
            }
            other => DataError::Sqlite(other),
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        // Anything not committed is lost, exactly like a crash.
        if self.in_txn {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::error!("rollback of {} failed: {}", self.path.display(), e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

pub struct FrameReader {
    path: PathBuf,
    conn: Connection,
}

impl FrameReader {
    pub fn open(path: &Path) -> Result<Self> {
        let db_path = path.join(DB_FILE);
        if !db_path.is_file() {
            return Err(DataError::StoreNotFound {
                path: path.to_path_buf(),
            });
        }
        let uri = format!("file:{}?immutable=1", escape_uri_path(&db_path));
        let conn = Connection::open_with_flags(
            uri,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "mmap_size", 0i64)?;
        conn.pragma_update(None, "cache_size", -READER_CACHE_KIB)?;
        log::debug!("opened frame store reader at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.conn
            .query_row(
                "SELECT value FROM frames WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
            .ok_or_else(|| DataError::KeyNotFound {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        contains_key(&self.conn, key)
    }

    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All keys, sorted by parsed frame index.
    pub fn keys_ordered(&self) -> Result<Vec<FrameKey>> {
        let mut stmt = self.conn.prepare("SELECT key FROM frames")?;
        let mut rows = stmt.query([])?;
        let mut raw = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            raw.push(key);
        }
        sort_keys(raw)
    }

    /// SHA-256 over every (key, value) pair in frame order.
    ///
    /// Two stores with the same digest hold the same frames under the same keys.
    pub fn digest(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        for key in self.keys_ordered()? {
            let value = self.get(key.as_str())?;
            hasher.update((key.as_str().len() as u64).to_le_bytes());
            hasher.update(key.as_str().as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(&value);
        }
        Ok(hasher.finalize().into())
    }
}

fn contains_key(conn: &Connection, key: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM frames WHERE key = ?1",
            params![key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn escape_uri_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '?' => out.push_str("%3f"),
            '#' => out.push_str("%23"),
            _ => out.push(c),
        }
    }
    out
}

// ----------------------------------------------------------------------------
// Handle state
// ----------------------------------------------------------------------------

/// Process-lifetime store connection owned by the data engine.
#[derive(Default)]
pub enum StoreHandle {
    #[default]
    Unopened,
    ReaderOpen(FrameReader),
    WriterOpen(FrameWriter),
}

impl StoreHandle {
    pub fn state_name(&self) -> &'static str {
        match self {
            StoreHandle::Unopened => "unopened",
            StoreHandle::ReaderOpen(_) => "reader-open",
            StoreHandle::WriterOpen(_) => "writer-open",
        }
    }

    /// Lazily open a reader. Fails while a writer is open.
    pub fn reader(&mut self, path: &Path, op: &'static str) -> Result<&FrameReader> {
        if let StoreHandle::Unopened = self {
            *self = StoreHandle::ReaderOpen(FrameReader::open(path)?);
        }
        match self {
            StoreHandle::ReaderOpen(reader) => Ok(reader),
            other => Err(DataError::InvalidHandleState {
                op,
                expected: "unopened or reader-open",
                actual: other.state_name(),
            }),
        }
    }

    pub fn ensure_unopened(&self, op: &'static str) -> Result<()> {
        match self {
            StoreHandle::Unopened => Ok(()),
            other => Err(DataError::InvalidHandleState {
                op,
                expected: "unopened",
                actual: other.state_name(),
            }),
        }
    }

    /// Open a writer. Only legal from `Unopened`.
    pub fn begin_write(
        &mut self,
        path: &Path,
        capacity_bytes: u64,
        commit_every: usize,
        resume: bool,
    ) -> Result<&mut FrameWriter> {
        self.ensure_unopened("begin_write")?;
        let writer = if resume {
            FrameWriter::resume(path, capacity_bytes)?
        } else {
            FrameWriter::open(path, capacity_bytes)?
        };
        *self = StoreHandle::WriterOpen(writer.with_commit_every(commit_every));
        self.writer("begin_write")
    }

    pub fn writer(&mut self, op: &'static str) -> Result<&mut FrameWriter> {
        match self {
            StoreHandle::WriterOpen(writer) => Ok(writer),
            other => Err(DataError::InvalidHandleState {
                op,
                expected: "writer-open",
                actual: other.state_name(),
            }),
        }
    }

    /// Commit the writer's tail and return to `Unopened`.
    pub fn finish_write(&mut self) -> Result<WriteStats> {
        match std::mem::take(self) {
            StoreHandle::WriterOpen(writer) => writer.finish(),
            other => {
                let actual = other.state_name();
                *self = other;
                Err(DataError::InvalidHandleState {
                    op: "finish_write",
                    expected: "writer-open",
                    actual,
                })
            }
        }
    }

    /// Drop whatever is open. An open writer rolls back its uncommitted tail.
    pub fn close(&mut self) {
        *self = StoreHandle::Unopened;
    }
}
