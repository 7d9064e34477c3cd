//! File Walker: single-threaded depth-first directory traversal with a
//! bounded worker pool fanning out over each directory's files.
//!
//! Directory recursion stays on one thread (bounds open file handles and
//! keeps traversal order deterministic); only per-file stat+hash work is
//! dispatched to the pool, mirroring a `ThreadPoolExecutor` reused across
//! `os.walk` iterations rather than a fully parallel directory queue.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::SystemTime;

use crossbeam_channel::{Receiver, Sender, bounded};
use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};

use crate::core::config::{FileEqualityMode, StructurePolicy, WalkerConfig};
use crate::core::errors::{Result, ScanError};
#[cfg(feature = "sqlite")]
use crate::scanner::cache::{CacheKey, HashCache};
use crate::scanner::events::{ScanEvent, ScanEventHandle};
use crate::scanner::types::{
    DirectoryFingerprint, FolderInfo, ScanRequest, WarningRecord, WarningType,
};

/// The persistent hash cache when built with the `sqlite` feature, otherwise
/// a zero-sized stand-in so callers can keep passing `Option<&CacheHandle>`
/// regardless of which features are enabled.
#[cfg(feature = "sqlite")]
pub type CacheHandle = HashCache;
#[cfg(not(feature = "sqlite"))]
pub struct CacheHandle;

const GLOB_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Everything the walker produced for one scan: pre-aggregation fingerprints
/// keyed by posix relative path (`.` for root), plus collected warnings and
/// running counters for progress projection.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub fingerprints: BTreeMap<String, DirectoryFingerprint>,
    pub warnings: Vec<WarningRecord>,
    pub files_scanned: u64,
    pub folders_scanned: u64,
    pub folders_discovered: u64,
    pub bytes_scanned: u64,
    pub workers: usize,
}

struct CompiledExcludes {
    patterns: Vec<Pattern>,
}

impl CompiledExcludes {
    fn compile(raw: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let mut patterns = Vec::new();
        for pattern in raw {
            let pattern = pattern.as_ref();
            let compiled = Pattern::new(pattern).map_err(|error| ScanError::InvalidConfig {
                details: format!("invalid glob {pattern:?}: {error}"),
            })?;
            patterns.push(compiled);
        }
        Ok(Self { patterns })
    }

    fn matches(&self, rel_posix: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(rel_posix, GLOB_MATCH_OPTIONS))
    }

    fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// A unit of file-level work dispatched to the worker pool. Stat is already
/// done by the traversal thread; the worker's job is the (possibly cache-
/// hitting) hash and its one stability retry.
struct FileJob {
    abs_path: PathBuf,
    identity_base: String,
    size: u64,
    mtime_nanos: i64,
    reply: Sender<FileJobResult>,
}

enum FileJobResult {
    Kept {
        identity: String,
        size: u64,
        unstable: bool,
    },
    Warning(WarningRecord),
}

fn worker_loop(
    job_rx: Receiver<FileJob>,
    cache: Option<&CacheHandle>,
    equality_mode: FileEqualityMode,
    chunk_bytes: usize,
    stability_retries: u32,
) {
    while let Ok(job) = job_rx.recv() {
        let outcome = process_file_job(&job, cache, equality_mode, chunk_bytes, stability_retries);
        let _ = job.reply.send(outcome);
    }
}

fn process_file_job(
    job: &FileJob,
    cache: Option<&CacheHandle>,
    equality_mode: FileEqualityMode,
    chunk_bytes: usize,
    stability_retries: u32,
) -> FileJobResult {
    match equality_mode {
        FileEqualityMode::NameSize => FileJobResult::Kept {
            identity: format!("{}:{}", job.identity_base, job.size),
            size: job.size,
            unstable: false,
        },
        FileEqualityMode::Sha256 => {
            match hash_file(
                &job.abs_path,
                job.size,
                job.mtime_nanos,
                chunk_bytes,
                stability_retries,
                cache,
            ) {
                Ok(Some(hex)) => FileJobResult::Kept {
                    identity: format!("{}#{}", job.identity_base, hex),
                    size: job.size,
                    unstable: false,
                },
                Ok(None) => FileJobResult::Warning(WarningRecord {
                    path: job.abs_path.clone(),
                    kind: WarningType::Unstable,
                    message: "File changed during hashing twice; skipping".to_string(),
                }),
                Err(error) => FileJobResult::Warning(WarningRecord {
                    path: job.abs_path.clone(),
                    kind: WarningType::IoError,
                    message: error.to_string(),
                }),
            }
        }
    }
}

fn hash_file(
    path: &Path,
    expected_size: u64,
    expected_mtime_nanos: i64,
    chunk_bytes: usize,
    stability_retries: u32,
    cache: Option<&CacheHandle>,
) -> std::io::Result<Option<String>> {
    #[cfg(feature = "sqlite")]
    let key = {
        let meta = fs::symlink_metadata(path)?;
        let key = CacheKey {
            device: meta.dev(),
            inode: meta.ino(),
            size: expected_size,
            mtime_nanos: expected_mtime_nanos,
        };
        if let Some(cache) = cache {
            if let Ok(Some(hex)) = cache.get(key) {
                return Ok(Some(hex));
            }
        }
        key
    };
    #[cfg(not(feature = "sqlite"))]
    let _ = cache;

    let mut attempt = 0_u32;
    loop {
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0_u8; chunk_bytes];
        let mut read_bytes = 0_u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            read_bytes += n as u64;
        }

        if read_bytes != expected_size {
            let stat_after = fs::metadata(path)?;
            let mtime_after = mtime_nanos(&stat_after);
            if stat_after.len() != expected_size || mtime_after != expected_mtime_nanos {
                attempt += 1;
                if attempt <= stability_retries {
                    continue;
                }
                return Ok(None);
            }
        }

        let hex = format!("{:x}", hasher.finalize());
        #[cfg(feature = "sqlite")]
        if let Some(cache) = cache {
            let _ = cache.set(key, &hex);
        }
        return Ok(Some(hex));
    }
}

fn mtime_nanos(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

struct WalkContext<'a> {
    job_tx: Option<Sender<FileJob>>,
    equality_mode: FileEqualityMode,
    structure_policy: StructurePolicy,
    force_case_insensitive: bool,
    excludes: CompiledExcludes,
    includes: CompiledExcludes,
    seen_inodes: std::collections::HashSet<(u64, u64)>,
    outcome: WalkOutcome,
    events: &'a ScanEventHandle,
}

/// Walk `request.root_path`, producing pre-aggregation fingerprints. Fails
/// only if the root is not a directory.
pub fn walk(
    request: &ScanRequest,
    config: &WalkerConfig,
    cache: Option<&CacheHandle>,
    events: &ScanEventHandle,
) -> Result<WalkOutcome> {
    let root = request.root_path.clone();
    if !root.is_dir() {
        return Err(ScanError::InvalidRoot { path: root });
    }

    let excludes = CompiledExcludes::compile(
        config
            .exclude_globs
            .iter()
            .cloned()
            .chain(request.exclude.iter().cloned()),
    )?;
    let includes = CompiledExcludes::compile(request.include.iter().cloned())?;

    let worker_threads = request.resolved_concurrency();
    let (job_tx, job_rx) = bounded::<FileJob>(worker_threads.max(1) * 4);

    let mut ctx = WalkContext {
        job_tx: Some(job_tx),
        equality_mode: config.file_equality,
        structure_policy: config.structure_policy,
        force_case_insensitive: config.force_case_insensitive,
        excludes,
        includes,
        seen_inodes: std::collections::HashSet::new(),
        outcome: WalkOutcome {
            workers: worker_threads,
            ..WalkOutcome::default()
        },
        events,
    };

    let equality_mode = config.file_equality;
    let chunk_bytes = config.hash_chunk_bytes;
    let stability_retries = config.stability_retries;

    thread::scope(|scope| {
        for _ in 0..worker_threads {
            let job_rx = job_rx.clone();
            scope.spawn(move || {
                worker_loop(job_rx, cache, equality_mode, chunk_bytes, stability_retries);
            });
        }
        walk_directory(&root, ".", &mut ctx);
        ctx.job_tx.take();
    });

    Ok(ctx.outcome)
}

fn walk_directory(abs_dir: &Path, rel_dir: &str, ctx: &mut WalkContext<'_>) {
    ctx.outcome.folders_discovered += 1;
    ctx.events.send(ScanEvent::FolderDiscovered {
        path: abs_dir.display().to_string(),
    });

    let entries = match fs::read_dir(abs_dir) {
        Ok(entries) => entries,
        Err(source) => {
            let kind = if source.kind() == std::io::ErrorKind::PermissionDenied {
                WarningType::Permission
            } else {
                WarningType::IoError
            };
            ctx.outcome.warnings.push(WarningRecord {
                path: abs_dir.to_path_buf(),
                kind,
                message: source.to_string(),
            });
            return;
        }
    };

    let mut dir_names: Vec<String> = Vec::new();
    let mut file_entries: Vec<(String, PathBuf, fs::Metadata)> = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                ctx.outcome.warnings.push(WarningRecord {
                    path: abs_dir.to_path_buf(),
                    kind: WarningType::IoError,
                    message: source.to_string(),
                });
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let abs_path = entry.path();
        let meta = match fs::symlink_metadata(&abs_path) {
            Ok(meta) => meta,
            Err(source) => {
                ctx.outcome.warnings.push(WarningRecord {
                    path: abs_path,
                    kind: WarningType::IoError,
                    message: source.to_string(),
                });
                continue;
            }
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        if meta.is_dir() {
            dir_names.push(name);
        } else if meta.is_file() {
            file_entries.push((name, abs_path, meta));
        }
    }

    dir_names.sort();
    file_entries.sort_by(|a, b| a.0.cmp(&b.0));

    let (result_tx, result_rx) = bounded::<FileJobResult>(file_entries.len().max(1));
    let mut dispatched = 0_usize;
    let mut folder_weights: BTreeMap<String, u64> = BTreeMap::new();
    let mut folder_unstable = false;

    for (name, abs_path, meta) in &file_entries {
        let rel_path = join_posix(rel_dir, name);
        if ctx.excludes.matches(&rel_path) {
            continue;
        }
        if !ctx.includes.is_empty() && !ctx.includes.matches(&rel_path) {
            continue;
        }

        let key = (meta.dev(), meta.ino());
        if !ctx.seen_inodes.insert(key) {
            continue;
        }

        let base = match ctx.structure_policy {
            StructurePolicy::Relative => rel_path_within_folder(rel_dir, &rel_path),
            StructurePolicy::BagOfFiles => name.clone(),
        };
        let base = if ctx.force_case_insensitive {
            base.to_lowercase()
        } else {
            base
        };

        let size = meta.len();
        let mtime_nanos = mtime_nanos(meta);

        if let Some(job_tx) = ctx.job_tx.as_ref() {
            job_tx
                .send(FileJob {
                    abs_path: abs_path.clone(),
                    identity_base: base,
                    size,
                    mtime_nanos,
                    reply: result_tx.clone(),
                })
                .ok();
            dispatched += 1;
        }
    }
    drop(result_tx);

    for _ in 0..dispatched {
        match result_rx.recv() {
            Ok(FileJobResult::Kept {
                identity,
                size,
                unstable,
            }) => {
                *folder_weights.entry(identity).or_insert(0) += size;
                folder_unstable |= unstable;
                ctx.outcome.files_scanned += 1;
                ctx.outcome.bytes_scanned += size;
                ctx.events.send(ScanEvent::FileScanned {
                    bytes: size,
                    cache_hit: false,
                });
            }
            Ok(FileJobResult::Warning(warning)) => {
                folder_unstable |= warning.kind == WarningType::Unstable;
                ctx.events.send(ScanEvent::Warning {
                    kind: format!("{:?}", warning.kind),
                    path: Some(warning.path.display().to_string()),
                    message: warning.message.clone(),
                });
                ctx.outcome.warnings.push(warning);
            }
            Err(_) => break,
        }
    }

    let total_bytes: u64 = folder_weights.values().sum();
    let file_count = folder_weights.len();
    ctx.outcome.folders_scanned += 1;
    ctx.outcome.fingerprints.insert(
        rel_dir.to_string(),
        DirectoryFingerprint {
            folder: FolderInfo {
                path: abs_dir.display().to_string(),
                relative_path: rel_dir.to_string(),
                total_bytes,
                file_count,
                unstable: folder_unstable,
            },
            file_weights: folder_weights,
        },
    );

    for name in &dir_names {
        let rel_path = join_posix(rel_dir, name);
        if ctx.excludes.matches(&rel_path) {
            continue;
        }
        let child_abs = abs_dir.join(name);
        walk_directory(&child_abs, &rel_path, ctx);
    }
}

fn join_posix(rel_dir: &str, name: &str) -> String {
    if rel_dir == "." {
        name.to_string()
    } else {
        format!("{rel_dir}/{name}")
    }
}

fn rel_path_within_folder(rel_dir: &str, rel_path: &str) -> String {
    if rel_dir == "." {
        rel_path.to_string()
    } else {
        rel_path
            .strip_prefix(rel_dir)
            .and_then(|s| s.strip_prefix('/'))
            .unwrap_or(rel_path)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::events::ScanEventHandle;
    use std::fs;

    fn request_for(root: &Path) -> ScanRequest {
        let mut req = ScanRequest::new(root);
        req.file_equality = FileEqualityMode::Sha256;
        req
    }

    #[test]
    fn walks_simple_tree_and_builds_fingerprints() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub").join("b.txt"), b"world").unwrap();

        let config = WalkerConfig::default();
        let (handle, _rx) = ScanEventHandle::new(64);
        let outcome = walk(&request_for(tmp.path()), &config, None, &handle).unwrap();

        assert!(outcome.fingerprints.contains_key("."));
        assert!(outcome.fingerprints.contains_key("sub"));
        assert_eq!(outcome.files_scanned, 2);
        assert_eq!(outcome.fingerprints["."].file_weights.len(), 1);
        assert_eq!(outcome.fingerprints["sub"].file_weights.len(), 1);
    }

    #[test]
    fn name_size_mode_skips_hashing() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();

        let mut config = WalkerConfig::default();
        config.file_equality = FileEqualityMode::NameSize;
        let (handle, _rx) = ScanEventHandle::new(64);
        let outcome = walk(&request_for(tmp.path()), &config, None, &handle).unwrap();

        let identity = outcome.fingerprints["."]
            .file_weights
            .keys()
            .next()
            .unwrap()
            .clone();
        assert!(identity.ends_with(":5"));
        assert!(!identity.contains('#'));
    }

    #[test]
    fn exclude_glob_prunes_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git").join("HEAD"), b"ref").unwrap();
        fs::write(tmp.path().join("keep.txt"), b"kept").unwrap();

        let config = WalkerConfig::default();
        let (handle, _rx) = ScanEventHandle::new(64);
        let outcome = walk(&request_for(tmp.path()), &config, None, &handle).unwrap();

        assert!(!outcome.fingerprints.contains_key(".git"));
        assert_eq!(outcome.fingerprints["."].file_weights.len(), 1);
    }

    #[test]
    fn hardlinked_file_counted_once() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::create_dir(tmp.path().join("b")).unwrap();
        let original = tmp.path().join("a").join("shared.bin");
        fs::write(&original, b"shared bytes").unwrap();
        fs::hard_link(&original, tmp.path().join("b").join("shared.bin")).unwrap();

        let config = WalkerConfig::default();
        let (handle, _rx) = ScanEventHandle::new(64);
        let outcome = walk(&request_for(tmp.path()), &config, None, &handle).unwrap();

        let total_files: usize = outcome
            .fingerprints
            .values()
            .map(|fp| fp.file_weights.len())
            .sum();
        assert_eq!(total_files, 1);
    }

    #[test]
    fn nonexistent_root_is_invalid_root_error() {
        let config = WalkerConfig::default();
        let (handle, _rx) = ScanEventHandle::new(8);
        let req = request_for(Path::new("/nonexistent/definitely/not/here"));
        let err = walk(&req, &config, None, &handle).unwrap_err();
        assert_eq!(err.code(), "FD-1001");
    }

    #[test]
    fn case_insensitive_lowers_identity_base() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("README.TXT"), b"x").unwrap();

        let mut config = WalkerConfig::default();
        config.force_case_insensitive = true;
        config.file_equality = FileEqualityMode::NameSize;
        let (handle, _rx) = ScanEventHandle::new(64);
        let outcome = walk(&request_for(tmp.path()), &config, None, &handle).unwrap();

        let identity = outcome.fingerprints["."]
            .file_weights
            .keys()
            .next()
            .unwrap()
            .clone();
        assert!(identity.starts_with("readme.txt"));
    }
}
