//! Shared test infrastructure for folderdupe.
//!
//! Provides:
//! - `CmdResult` + `run_cli_case()` — integration test CLI runner for `fdupe`
//! - `TestEnvironment` — directory tree builder for scan fixtures
//! - `run_scan_sync()` — drives `ScanJobManager` to completion against a
//!   tempdir-scoped config, for tests that want groups without spawning a
//!   process

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use folderdupe::core::config::Config;
use folderdupe::prelude::{GroupRecord, ScanJobManager, ScanRequest, ScanStatus};

// ──────────────────── CLI test runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_fdupe") {
        let p = PathBuf::from(path);
        if p.exists() {
            return p;
        }
    }

    let exe_name = if cfg!(windows) { "fdupe.exe" } else { "fdupe" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!(
            "unable to resolve fdupe binary path for integration test (checked CARGO_BIN_EXE_fdupe and debug sibling path)"
        ),
    }
}

/// Run the `fdupe` binary with `args`, isolating its config/cache/log paths
/// under a fresh `HOME` so parallel test runs never share state.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("fdupe-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let isolated_home = root.join(format!("{}-{}-home", sanitize(case_name), now_millis()));
    fs::create_dir_all(&isolated_home).expect("create isolated home dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", &isolated_home)
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute fdupe command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── TestEnvironment ────────────────────

/// Builder for directory trees used as scan fixtures.
pub struct TestEnvironment {
    root: tempfile::TempDir,
}

impl TestEnvironment {
    /// Create a new empty test environment.
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create test tempdir"),
        }
    }

    /// Root directory path.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Create a file with the given content at `rel_path`, creating parent
    /// directories as needed.
    pub fn create_file(&self, rel_path: &str, content: &[u8]) -> PathBuf {
        let path = self.root.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, content).expect("write test file");
        path
    }

    /// Create an empty directory at `rel_path`.
    pub fn create_dir(&self, rel_path: &str) -> PathBuf {
        let path = self.root.path().join(rel_path);
        fs::create_dir_all(&path).expect("create test dir");
        path
    }

    /// Hardlink an existing file at `src_rel` into a second location at
    /// `dst_rel` (unix only — used for inode-deduplication fixtures).
    #[cfg(unix)]
    pub fn hard_link(&self, src_rel: &str, dst_rel: &str) -> PathBuf {
        let src = self.root.path().join(src_rel);
        let dst = self.root.path().join(dst_rel);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::os::unix::fs::hard_link(&src, &dst).expect("create hardlink");
        dst
    }
}

// ──────────────────── run_scan_sync ────────────────────

/// Build a `Config` whose cache/log paths live under `home`, so concurrent
/// test scans never contend on `~/.local/share/folderdupe`.
pub fn isolated_config(home: &Path) -> Config {
    let mut config = Config::default();
    let data_dir = home.join("folderdupe-data");
    fs::create_dir_all(&data_dir).expect("create isolated data dir");
    config.paths.hash_cache_db = data_dir.join("hash-cache.sqlite3");
    config.paths.sqlite_log = data_dir.join("activity.sqlite3");
    config.paths.jsonl_log = data_dir.join("activity.jsonl");
    config
}

/// Run a scan against `root` with `similarity_threshold` to completion and
/// return the resulting groups. Panics on scan failure — callers that expect
/// a failed scan should drive `ScanJobManager` directly instead.
pub fn run_scan_sync(env: &TestEnvironment, similarity_threshold: f64) -> Vec<GroupRecord> {
    let config = isolated_config(env.root());
    let manager = ScanJobManager::new(config).expect("build scan job manager");

    let mut request = ScanRequest::new(env.root());
    request.similarity_threshold = similarity_threshold;

    let scan_id = manager.start_scan(request).expect("start scan");

    loop {
        let status = manager.get_job_status(&scan_id).expect("job status");
        if matches!(status, ScanStatus::Completed | ScanStatus::Failed) {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let status = manager.get_job_status(&scan_id).expect("job status");
    assert_eq!(status, ScanStatus::Completed, "scan did not complete");

    let groups = manager
        .get_groups(&scan_id, None)
        .expect("completed scan groups");
    manager.shutdown();
    groups
}
