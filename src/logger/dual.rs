//! Dual-write coordinator: writes to both SQLite and JSONL with graceful degradation.
//!
//! Architecture: a dedicated logger thread owns the `SqliteLogger` and `JsonlWriter`.
//! All other threads send `ScanLogEvent` via a bounded crossbeam channel. Non-blocking
//! `try_send()` ensures the scan job manager is never blocked by logging back-pressure.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, ScanError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ScanLogRow, SqliteLogger};

// ──────────────────── channel capacity ────────────────────

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events that can be logged through the dual-write coordinator.
#[derive(Debug, Clone)]
pub enum ScanLogEvent {
    ScanStarted {
        scan_id: String,
        root_path: String,
    },
    PhaseEntered {
        scan_id: String,
        phase: String,
    },
    PhaseCompleted {
        scan_id: String,
        phase: String,
        duration_ms: u64,
    },
    ScanCompleted {
        scan_id: String,
        group_count: usize,
        bytes_scanned: u64,
        duration_ms: u64,
    },
    ScanFailed {
        scan_id: String,
        error_code: String,
        error_message: String,
    },
    WarningRaised {
        scan_id: String,
        path: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for sending log events.
///
/// Internally wraps a bounded crossbeam `Sender`. The `send()` method uses
/// `try_send()` so callers are never blocked by logging back-pressure.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ScanLogEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking.
    ///
    /// If the channel is full the event is dropped and the dropped-events counter
    /// is incremented.
    pub fn send(&self, event: ScanLogEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown and wait for the logger thread to finish.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ScanLogEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the dual-write logger.
pub struct DualLoggerConfig {
    /// Path to the SQLite database. `None` disables SQLite.
    pub sqlite_path: Option<PathBuf>,
    /// JSONL writer config (always active).
    pub jsonl_config: JsonlConfig,
    /// Bounded channel capacity.
    pub channel_capacity: usize,
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        Self {
            sqlite_path: Some(PathBuf::from(default_sqlite_path())),
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

fn default_sqlite_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    format!("{home}/.local/share/folderdupe/activity.sqlite3")
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The returned handle is `Clone + Send` and can be shared across threads.
/// The logger thread runs until `handle.shutdown()` is called or all senders
/// are dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ScanLogEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("folderdupe-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config.sqlite_path, config.jsonl_config, dropped_clone);
        })
        .map_err(|e| ScanError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: Receiver<ScanLogEvent>,
    sqlite_path: Option<PathBuf>,
    jsonl_config: JsonlConfig,
    dropped: Arc<AtomicU64>,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match SqliteLogger::open(&p) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("[FD-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = sqlite_path;

    let mut jsonl = JsonlWriter::open(jsonl_config);
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::WarningRaised, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ScanLogEvent::Shutdown) {
            jsonl.flush();
            jsonl.fsync();
            break;
        }

        let jsonl_entry = event_to_log_entry(&event);
        jsonl.write_entry(&jsonl_entry);

        #[cfg(feature = "sqlite")]
        {
            if let Some(db) = &sqlite {
                let row = event_to_sqlite_row(&event);
                if db.log_event(&row).is_ok() {
                    sqlite_failures = 0;
                } else {
                    sqlite_failures += 1;
                    if sqlite_failures >= 3 {
                        eprintln!(
                            "[FD-DUAL] SQLite write failed {sqlite_failures} times, disabling"
                        );
                        sqlite = None;
                    }
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ScanLogEvent) -> LogEntry {
    match event {
        ScanLogEvent::ScanStarted { scan_id, root_path } => {
            let mut e = LogEntry::new(EventType::ScanStarted, Severity::Info);
            e.scan_id = Some(scan_id.clone());
            e.root_path = Some(root_path.clone());
            e
        }
        ScanLogEvent::PhaseEntered { scan_id, phase } => {
            let mut e = LogEntry::new(EventType::PhaseEntered, Severity::Info);
            e.scan_id = Some(scan_id.clone());
            e.phase = Some(phase.clone());
            e
        }
        ScanLogEvent::PhaseCompleted {
            scan_id,
            phase,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::PhaseCompleted, Severity::Info);
            e.scan_id = Some(scan_id.clone());
            e.phase = Some(phase.clone());
            e.duration_ms = Some(*duration_ms);
            e
        }
        ScanLogEvent::ScanCompleted {
            scan_id,
            group_count,
            bytes_scanned,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ScanCompleted, Severity::Info);
            e.scan_id = Some(scan_id.clone());
            e.group_count = Some(*group_count);
            e.bytes_scanned = Some(*bytes_scanned);
            e.duration_ms = Some(*duration_ms);
            e
        }
        ScanLogEvent::ScanFailed {
            scan_id,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::ScanFailed, Severity::Critical);
            e.scan_id = Some(scan_id.clone());
            e.error_code = Some(error_code.clone());
            e.message = Some(error_message.clone());
            e
        }
        ScanLogEvent::WarningRaised {
            scan_id,
            path,
            message,
        } => {
            let mut e = LogEntry::new(EventType::WarningRaised, Severity::Warning);
            e.scan_id = Some(scan_id.clone());
            e.path = Some(path.clone());
            e.message = Some(message.clone());
            e
        }
        ScanLogEvent::Shutdown => {
            // Should not reach here; handled above.
            LogEntry::new(EventType::ScanCompleted, Severity::Info)
        }
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn event_to_sqlite_row(event: &ScanLogEvent) -> ScanLogRow {
    let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let base = |scan_id: &str, event_type: &str, severity: &str| ScanLogRow {
        timestamp: ts.clone(),
        scan_id: Some(scan_id.to_string()),
        event_type: event_type.to_string(),
        severity: severity.to_string(),
        root_path: None,
        phase: None,
        duration_ms: None,
        group_count: None,
        bytes_scanned: None,
        path: None,
        success: 1,
        error_code: None,
        message: None,
        details: None,
    };

    match event {
        ScanLogEvent::ScanStarted { scan_id, root_path } => ScanLogRow {
            root_path: Some(root_path.clone()),
            ..base(scan_id, "scan_started", "info")
        },
        ScanLogEvent::PhaseEntered { scan_id, phase } => ScanLogRow {
            phase: Some(phase.clone()),
            ..base(scan_id, "phase_entered", "info")
        },
        ScanLogEvent::PhaseCompleted {
            scan_id,
            phase,
            duration_ms,
        } => ScanLogRow {
            phase: Some(phase.clone()),
            duration_ms: Some(*duration_ms as i64),
            ..base(scan_id, "phase_completed", "info")
        },
        ScanLogEvent::ScanCompleted {
            scan_id,
            group_count,
            bytes_scanned,
            duration_ms,
        } => ScanLogRow {
            group_count: Some(*group_count as i64),
            bytes_scanned: Some(*bytes_scanned as i64),
            duration_ms: Some(*duration_ms as i64),
            ..base(scan_id, "scan_completed", "info")
        },
        ScanLogEvent::ScanFailed {
            scan_id,
            error_code,
            error_message,
        } => ScanLogRow {
            success: 0,
            error_code: Some(error_code.clone()),
            message: Some(error_message.clone()),
            ..base(scan_id, "scan_failed", "critical")
        },
        ScanLogEvent::WarningRaised {
            scan_id,
            path,
            message,
        } => ScanLogRow {
            path: Some(path.clone()),
            message: Some(message.clone()),
            ..base(scan_id, "warning_raised", "warning")
        },
        ScanLogEvent::Shutdown => base("", "shutdown", "info"),
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> DualLoggerConfig {
        DualLoggerConfig {
            sqlite_path: Some(dir.join("test.db")),
            jsonl_config: JsonlConfig {
                path: dir.join("test.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 3,
                fsync_interval_secs: 60,
            },
            channel_capacity: 64,
        }
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        handle.send(ScanLogEvent::ScanStarted {
            scan_id: "abc123".to_string(),
            root_path: "/data/projects".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("test.jsonl")).unwrap();
        assert!(!contents.is_empty());
        assert!(contents.contains("scan_started"));
    }

    #[test]
    fn multiple_events_logged() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();

        handle.send(ScanLogEvent::ScanStarted {
            scan_id: "abc123".to_string(),
            root_path: "/data/projects".to_string(),
        });
        handle.send(ScanLogEvent::PhaseCompleted {
            scan_id: "abc123".to_string(),
            phase: "walking".to_string(),
            duration_ms: 250,
        });
        handle.send(ScanLogEvent::ScanCompleted {
            scan_id: "abc123".to_string(),
            group_count: 5,
            bytes_scanned: 3_000_000_000,
            duration_ms: 1450,
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("test.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 3);

        #[cfg(feature = "sqlite")]
        {
            let db = SqliteLogger::open(&dir.path().join("test.db")).unwrap();
            let events = db.events_for_scan("abc123").unwrap();
            assert_eq!(events.len(), 3);
        }
    }

    #[test]
    fn handles_cloneable_and_send() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        let h2 = handle.clone();

        handle.send(ScanLogEvent::ScanStarted {
            scan_id: "abc".to_string(),
            root_path: "/data".to_string(),
        });
        h2.send(ScanLogEvent::ScanCompleted {
            scan_id: "abc".to_string(),
            group_count: 1,
            bytes_scanned: 10,
            duration_ms: 50,
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("test.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn sqlite_disabled_when_path_none() {
        let dir = tempfile::tempdir().unwrap();
        let config = DualLoggerConfig {
            sqlite_path: None,
            jsonl_config: JsonlConfig {
                path: dir.path().join("no_sqlite.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 3,
                fsync_interval_secs: 60,
            },
            channel_capacity: 64,
        };
        let (handle, join) = spawn_logger(config).unwrap();
        handle.send(ScanLogEvent::ScanFailed {
            scan_id: "abc".to_string(),
            error_code: "FD-9999".to_string(),
            error_message: "test error".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("no_sqlite.jsonl")).unwrap();
        assert!(contents.contains("FD-9999"));
    }

    #[test]
    fn dropped_events_counted() {
        let dir = tempfile::tempdir().unwrap();
        let config = DualLoggerConfig {
            sqlite_path: None,
            jsonl_config: JsonlConfig {
                path: dir.path().join("drop.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 3,
                fsync_interval_secs: 60,
            },
            channel_capacity: 2, // tiny channel
        };
        let (handle, _join) = spawn_logger(config).unwrap();
        assert_eq!(handle.dropped_events(), 0);
        handle.shutdown();
    }
}
