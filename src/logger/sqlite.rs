//! SQLite logger: WAL-mode database for structured scan-event storage and querying.
//!
//! Uses Write-Ahead Logging for concurrent read/write, prepared statements for
//! insert throughput, and graceful degradation when the disk is too full to write.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, ScanError};

/// SQLite scan-event logger with WAL mode and prepared-statement patterns.
pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
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
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── scan_log ────────────────────

    /// Insert a row into `scan_log`.
    pub fn log_event(&self, row: &ScanLogRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO scan_log (
                timestamp, scan_id, event_type, severity, root_path, phase,
                duration_ms, group_count, bytes_scanned, path, success,
                error_code, message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            )?
            .execute(params![
                row.timestamp,
                row.scan_id,
                row.event_type,
                row.severity,
                row.root_path,
                row.phase,
                row.duration_ms,
                row.group_count,
                row.bytes_scanned,
                row.path,
                row.success,
                row.error_code,
                row.message,
                row.details,
            ])?;
        Ok(())
    }

    /// Query the event history for a single scan, oldest first.
    pub fn events_for_scan(&self, scan_id: &str) -> Result<Vec<ScanLogRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, scan_id, event_type, severity, root_path, phase,
                    duration_ms, group_count, bytes_scanned, path, success,
                    error_code, message, details
             FROM scan_log WHERE scan_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![scan_id], row_from_sql)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Query recent events across all scans, newest first.
    pub fn recent_events(&self, limit: u32) -> Result<Vec<ScanLogRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, scan_id, event_type, severity, root_path, phase,
                    duration_ms, group_count, bytes_scanned, path, success,
                    error_code, message, details
             FROM scan_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], row_from_sql)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count events of a given `event_type` since a timestamp.
    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scan_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete `scan_log` rows older than `retention_days`.
    ///
    /// Returns the number of rows deleted. Should be called periodically to
    /// prevent unbounded table growth.
    pub fn prune_events(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff_str = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let deleted = self.conn.execute(
            "DELETE FROM scan_log WHERE timestamp < ?1",
            params![cutoff_str],
        )?;
        Ok(deleted)
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanLogRow> {
    Ok(ScanLogRow {
        timestamp: row.get(0)?,
        scan_id: row.get(1)?,
        event_type: row.get(2)?,
        severity: row.get(3)?,
        root_path: row.get(4)?,
        phase: row.get(5)?,
        duration_ms: row.get(6)?,
        group_count: row.get(7)?,
        bytes_scanned: row.get(8)?,
        path: row.get(9)?,
        success: row.get(10)?,
        error_code: row.get(11)?,
        message: row.get(12)?,
        details: row.get(13)?,
    })
}

// ──────────────────── row type ────────────────────

/// Row for the `scan_log` table.
#[derive(Debug, Clone)]
pub struct ScanLogRow {
    pub timestamp: String,
    pub scan_id: Option<String>,
    pub event_type: String,
    pub severity: String,
    pub root_path: Option<String>,
    pub phase: Option<String>,
    pub duration_ms: Option<i64>,
    pub group_count: Option<i64>,
    pub bytes_scanned: Option<i64>,
    pub path: Option<String>,
    pub success: i32,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA mmap_size = 67108864;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[FD-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scan_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            scan_id TEXT,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            root_path TEXT,
            phase TEXT,
            duration_ms INTEGER,
            group_count INTEGER,
            bytes_scanned INTEGER,
            path TEXT,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            message TEXT,
            details TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_scan_log_timestamp ON scan_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_scan_log_scan_id ON scan_log(scan_id);
        CREATE INDEX IF NOT EXISTS idx_scan_log_event_type ON scan_log(event_type);
        CREATE INDEX IF NOT EXISTS idx_scan_log_scan_time ON scan_log(scan_id, timestamp);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, SqliteLogger) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let logger = SqliteLogger::open(&db_path).unwrap();
        (dir, logger)
    }

    fn row(scan_id: &str, event_type: &str, ts: &str) -> ScanLogRow {
        ScanLogRow {
            timestamp: ts.to_string(),
            scan_id: Some(scan_id.to_string()),
            event_type: event_type.to_string(),
            severity: "info".to_string(),
            root_path: Some("/data/projects".to_string()),
            phase: None,
            duration_ms: None,
            group_count: None,
            bytes_scanned: None,
            path: None,
            success: 1,
            error_code: None,
            message: None,
            details: None,
        }
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, logger) = temp_db();
        assert!(logger.is_wal_mode());
    }

    #[test]
    fn insert_and_query_events_for_scan() {
        let (_dir, logger) = temp_db();
        logger
            .log_event(&row("abc123", "scan_started", "2026-02-14T16:30:00Z"))
            .unwrap();
        logger
            .log_event(&row("abc123", "scan_completed", "2026-02-14T16:31:00Z"))
            .unwrap();
        logger
            .log_event(&row("other", "scan_started", "2026-02-14T16:32:00Z"))
            .unwrap();

        let events = logger.events_for_scan("abc123").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "scan_started");
        assert_eq!(events[1].event_type, "scan_completed");
    }

    #[test]
    fn recent_events_newest_first() {
        let (_dir, logger) = temp_db();
        logger
            .log_event(&row("s1", "scan_started", "2026-02-14T16:30:00Z"))
            .unwrap();
        logger
            .log_event(&row("s2", "scan_started", "2026-02-14T16:31:00Z"))
            .unwrap();

        let events = logger.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].scan_id.as_deref(), Some("s2"));
    }

    #[test]
    fn aggregate_counts() {
        let (_dir, logger) = temp_db();
        for i in 0..5 {
            logger
                .log_event(&row(
                    &format!("s{i}"),
                    "scan_completed",
                    &format!("2026-02-14T16:3{i}:00Z"),
                ))
                .unwrap();
        }

        let count = logger
            .count_events_since("scan_completed", "2026-02-14T00:00:00Z")
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn prune_events_removes_old_rows() {
        let (_dir, logger) = temp_db();
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        logger
            .log_event(&row("old", "scan_completed", "2000-01-01T00:00:00Z"))
            .unwrap();
        logger.log_event(&row("recent", "scan_completed", &now)).unwrap();

        let deleted = logger.prune_events(30).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(logger.recent_events(10).unwrap().len(), 1);
    }

    #[test]
    fn idempotent_schema_creation() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("idempotent.db");
        let _ = SqliteLogger::open(&db_path).unwrap();
        let logger = SqliteLogger::open(&db_path).unwrap();
        assert!(logger.is_wal_mode());
    }
}
