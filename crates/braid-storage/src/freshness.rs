//! Freshness checking for long-lived processes.
//!
//! A daemon keeps its database handle open for hours while git merges swap
//! the underlying file out from under it (atomic rename replaces the inode).
//! A stale handle then serves a dead WAL snapshot indefinitely. The
//! [`SharedStore`] wraps the store in a reader/writer lock and fast-stats
//! the file's (inode, mtime, size) tuple before every read; a changed tuple
//! quiesces readers and reconnects.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::sqlite::SqliteStore;

/// Identity tuple of the database file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub inode: u64,
    pub mtime: SystemTime,
    pub size: u64,
}

impl FileSnapshot {
    /// Stats the file and captures its identity tuple.
    pub fn capture(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            inode: inode_of(&meta),
            mtime: meta.modified()?,
            size: meta.len(),
        })
    }
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> u64 {
    0
}

/// A store wrapped for concurrent use with out-of-band file replacement
/// detection.
///
/// Reads take the read lock for the duration of their query; a reconnect
/// takes the write lock, so no reader ever observes a closed handle.
pub struct SharedStore {
    path: PathBuf,
    inner: RwLock<SqliteStore>,
    /// Guarded separately so concurrent readers serialize the stat-and-
    /// compare step without contending on the store lock.
    snapshot: Mutex<FileSnapshot>,
    /// Last observed `PRAGMA data_version`; covers same-file writers that
    /// leave the identity tuple untouched.
    data_version: Mutex<i64>,
}

impl SharedStore {
    /// Opens the database and captures its file snapshot.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = SqliteStore::open(&path)?;
        let snapshot = FileSnapshot::capture(&path)?;
        let data_version = query_data_version(&store)?;
        Ok(Self {
            path,
            inner: RwLock::new(store),
            snapshot: Mutex::new(snapshot),
            data_version: Mutex::new(data_version),
        })
    }

    /// Runs an operation against a guaranteed-fresh store.
    ///
    /// Mutations go through here too: the store serializes writers on its
    /// own connection mutex, so the read lock only excludes reconnects.
    pub fn with<R>(&self, f: impl FnOnce(&SqliteStore) -> Result<R>) -> Result<R> {
        self.check_fresh()?;
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;
        f(&guard)
    }

    /// The wrapped database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stats the database file and reconnects when its identity changed.
    fn check_fresh(&self) -> Result<()> {
        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;

        let current = FileSnapshot::capture(&self.path)?;
        if current != *snapshot {
            info!(path = %self.path.display(), "database file replaced, reconnecting");
            self.reconnect()?;
            // Re-stat after reconnect; opening can touch WAL sidecars.
            *snapshot = FileSnapshot::capture(&self.path)?;
            return Ok(());
        }

        // Same file identity: poll the data version to notice same-file
        // writers. The connection picks committed WAL data up on its own;
        // this only keeps the counter current for observability.
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;
        let version = query_data_version(&guard)?;
        drop(guard);
        let mut last = self
            .data_version
            .lock()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;
        if version != *last {
            debug!(old = *last, new = version, "data version advanced");
            *last = version;
        }

        Ok(())
    }

    /// Closes and reopens the handle under the write lock. Retried once on
    /// failure, then surfaced.
    fn reconnect(&self) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;

        let store = match SqliteStore::open(&self.path) {
            Ok(store) => store,
            Err(first) => {
                warn!(error = %first, "reconnect failed, retrying once");
                SqliteStore::open(&self.path)?
            }
        };
        // The cache may describe the old file's graph.
        store.rebuild_blocked_cache_impl()?;

        let version = query_data_version(&store)?;
        *guard = store;
        drop(guard);

        let mut last = self
            .data_version
            .lock()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;
        *last = version;

        Ok(())
    }
}

fn query_data_version(store: &SqliteStore) -> Result<i64> {
    let conn = store.lock_conn()?;
    let version: i64 = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
    Ok(version)
}
