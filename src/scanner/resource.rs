//! Resource sampling: a cheap point-in-time snapshot captured on every
//! phase transition (CPU count, 1-minute load, process RSS, optional I/O
//! byte counters).

#![allow(missing_docs)]

use std::fs;

use chrono::Utc;

use crate::scanner::types::{ResourceSample, ResourceStats};

/// Capture a `ResourceSample` stamped with the current time.
#[must_use]
pub fn capture_resource_sample() -> ResourceSample {
    ResourceSample {
        stats: read_resource_stats(),
        timestamp: Utc::now(),
    }
}

/// Read the current process/system resource snapshot. Best-effort: any
/// source that cannot be read contributes a zero or `None`, never an error.
#[must_use]
pub fn read_resource_stats() -> ResourceStats {
    ResourceStats {
        cpu_cores: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        load_1m: read_load_1m(),
        process_rss_bytes: read_rss_linux(),
        process_read_bytes: read_proc_self_io("read_bytes"),
        process_write_bytes: read_proc_self_io("write_bytes"),
    }
}

#[cfg(target_os = "linux")]
fn read_load_1m() -> f64 {
    fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|contents| contents.split_whitespace().next().map(str::to_string))
        .and_then(|first| first.parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[cfg(not(target_os = "linux"))]
fn read_load_1m() -> f64 {
    0.0
}

/// RSS in bytes, parsed from `/proc/self/status`'s `VmRSS` line (reported in
/// kibibytes). Returns 0 if the file is unreadable or malformed.
#[cfg(target_os = "linux")]
pub fn read_rss_linux() -> u64 {
    let Ok(contents) = fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kib: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0);
            return kib * 1024;
        }
    }
    0
}

#[cfg(not(target_os = "linux"))]
pub fn read_rss_linux() -> u64 {
    0
}

#[cfg(target_os = "linux")]
fn read_proc_self_io(field: &str) -> Option<u64> {
    let contents = fs::read_to_string("/proc/self/io").ok()?;
    let prefix = format!("{field}:");
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix(&prefix) {
            return rest.trim().parse::<u64>().ok();
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_proc_self_io(_field: &str) -> Option<u64> {
    None
}
