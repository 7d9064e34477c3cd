//! Persistent content-hash cache: `(device, inode, size, mtime) -> sha256`.
//!
//! Keyed by the tuple that changes whenever a file's content plausibly
//! changes, so a cache hit never needs to re-read the file. WAL mode gives
//! concurrent readers while the walker's worker pool writes new entries.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, ScanError};

/// Composite key identifying a file's on-disk identity for caching purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub device: u64,
    pub inode: u64,
    pub size: u64,
    /// Modification time as nanoseconds since the Unix epoch.
    pub mtime_nanos: i64,
}

/// Durable, thread-safe SHA-256 lookup cache backed by SQLite in WAL mode.
///
/// No eviction policy: entries accumulate for the lifetime of the database
/// file. A stale entry is harmless because the key includes `mtime`, so any
/// content change produces a fresh, distinct key.
pub struct HashCache {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl HashCache {
    /// Open (or create) the cache database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ScanError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory cache, useful for tests and one-shot scans.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas_memory(&conn)?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a cached hash. Returns `None` on a miss.
    pub fn get(&self, key: CacheKey) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT sha256 FROM file_hashes WHERE device = ?1 AND inode = ?2 AND size = ?3 AND mtime = ?4",
        )?;
        let mut rows = stmt.query(params![
            key.device as i64,
            key.inode as i64,
            key.size as i64,
            key.mtime_nanos
        ])?;
        if let Some(row) = rows.next()? {
            let sha256: String = row.get(0)?;
            Ok(Some(sha256))
        } else {
            Ok(None)
        }
    }

    /// Insert or replace a cached hash for `key`.
    pub fn set(&self, key: CacheKey, sha256: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT OR REPLACE INTO file_hashes (device, inode, size, mtime, sha256)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            key.device as i64,
            key.inode as i64,
            key.size as i64,
            key.mtime_nanos,
            sha256
        ])?;
        Ok(())
    }

    /// Number of entries currently stored. Mostly useful in tests.
    pub fn len(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file_hashes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[FD-CACHE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_pragmas_memory(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA synchronous = OFF;")?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS file_hashes (
            device INTEGER NOT NULL,
            inode INTEGER NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            PRIMARY KEY (device, inode, size, mtime)
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> CacheKey {
        CacheKey {
            device: 1,
            inode: n,
            size: 1024,
            mtime_nanos: 1_700_000_000_000_000_000,
        }
    }

    #[test]
    fn miss_then_hit() {
        let cache = HashCache::open_in_memory().unwrap();
        assert!(cache.get(key(1)).unwrap().is_none());
        cache.set(key(1), "abc123").unwrap();
        assert_eq!(cache.get(key(1)).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let cache = HashCache::open_in_memory().unwrap();
        cache.set(key(1), "aaa").unwrap();
        cache.set(key(2), "bbb").unwrap();
        assert_eq!(cache.get(key(1)).unwrap().as_deref(), Some("aaa"));
        assert_eq!(cache.get(key(2)).unwrap().as_deref(), Some("bbb"));
    }

    #[test]
    fn mtime_change_produces_distinct_entry() {
        let cache = HashCache::open_in_memory().unwrap();
        let mut k = key(1);
        cache.set(k, "old").unwrap();
        k.mtime_nanos += 1;
        assert!(cache.get(k).unwrap().is_none());
        cache.set(k, "new").unwrap();
        assert_eq!(cache.get(k).unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn set_overwrites_existing_key() {
        let cache = HashCache::open_in_memory().unwrap();
        cache.set(key(5), "first").unwrap();
        cache.set(key(5), "second").unwrap();
        assert_eq!(cache.get(key(5)).unwrap().as_deref(), Some("second"));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn persists_across_reopen_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("hashes.sqlite3");
        {
            let cache = HashCache::open(&db_path).unwrap();
            cache.set(key(9), "persisted").unwrap();
        }
        let reopened = HashCache::open(&db_path).unwrap();
        assert_eq!(reopened.get(key(9)).unwrap().as_deref(), Some("persisted"));
    }
}
