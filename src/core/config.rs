//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};

/// Default number of most-recently-completed scan jobs kept in memory.
pub const DEFAULT_JOB_HISTORY: usize = 50;

/// Full scanner configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub walker: WalkerConfig,
    pub similarity: SimilarityConfig,
    pub job: JobConfig,
    pub paths: PathsConfig,
}

/// Walker behavior: concurrency, hashing mode, exclusions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WalkerConfig {
    /// Exclude globs applied relative to each directory being walked.
    pub exclude_globs: Vec<String>,
    /// `NAME_SIZE` skips hashing entirely; `SHA256` hashes file contents.
    pub file_equality: FileEqualityMode,
    /// `RELATIVE` builds identities from the full relative path; `BAG_OF_FILES`
    /// uses the basename only, ignoring directory structure.
    pub structure_policy: StructurePolicy,
    /// Lowercase identities before comparison.
    pub force_case_insensitive: bool,
    /// Worker pool size. Zero means `min(32, 2 * available_parallelism())`.
    pub worker_threads: usize,
    /// Chunk size used when streaming file contents into the hasher.
    pub hash_chunk_bytes: usize,
    /// Number of stat-drift retries before a file is flagged UNSTABLE.
    pub stability_retries: u32,
}

/// How file content equality is determined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileEqualityMode {
    #[default]
    NameSize,
    Sha256,
}

/// How file identities are scoped within a folder's fingerprint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructurePolicy {
    #[default]
    Relative,
    BagOfFiles,
}

/// Similarity engine thresholds and bucketing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Minimum weighted-Jaccard score for a pair to become a candidate edge.
    pub threshold: f64,
    /// Folders are bucketed by `round(total_bytes / size_bucket_bytes)` before
    /// pairwise comparison, so only same-bucket folders are ever compared.
    pub size_bucket_bytes: u64,
    /// Number of top divergences kept per candidate pair.
    pub max_divergences: usize,
}

/// Scan job manager pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobConfig {
    /// Maximum number of scans that may run concurrently.
    pub max_concurrent_scans: usize,
    /// Number of completed/failed jobs retained in the manager's history.
    pub history_capacity: usize,
}

/// Filesystem paths used by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub hash_cache_db: PathBuf,
    pub sqlite_log: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            exclude_globs: vec![
                ".git/**".to_string(),
                "node_modules/**".to_string(),
                "__pycache__/**".to_string(),
                ".cache/**".to_string(),
                "Thumbs.db".to_string(),
                ".DS_Store".to_string(),
            ],
            file_equality: FileEqualityMode::NameSize,
            structure_policy: StructurePolicy::Relative,
            force_case_insensitive: false,
            worker_threads: 0,
            hash_chunk_bytes: 4 * 1024 * 1024,
            stability_retries: 1,
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.80,
            size_bucket_bytes: 10 * 1024 * 1024,
            max_divergences: 5,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: std::thread::available_parallelism().map_or(2, |n| n.get().max(1)),
            history_capacity: DEFAULT_JOB_HISTORY,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[FD-CONFIG] WARNING: HOME not set, falling back to /var/lib/folderdupe for data paths"
                );
                PathBuf::from("/var/lib/folderdupe")
            },
            PathBuf::from,
        );
        let (cfg, data) = if home_dir == Path::new("/var/lib/folderdupe") {
            (
                PathBuf::from("/etc/folderdupe/config.toml"),
                home_dir,
            )
        } else {
            (
                home_dir.join(".config").join("folderdupe").join("config.toml"),
                home_dir.join(".local").join("share").join("folderdupe"),
            )
        };
        Self {
            config_file: cfg,
            hash_cache_db: data.join("hash-cache.sqlite3"),
            sqlite_log: data.join("activity.sqlite3"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Resolution order for config file path:
    /// 1. Explicit `path` argument (from `--config` CLI flag)
    /// 2. `FOLDERDUPE_CONFIG` environment variable
    /// 3. Default path (`~/.config/folderdupe/config.toml`)
    ///
    /// Missing config file is not an error when loading from the default path;
    /// defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_config = if path.is_none() {
            env::var_os("FOLDERDUPE_CONFIG").map(PathBuf::from)
        } else {
            None
        };

        let path_buf = path.map_or_else(
            || env_config.clone().unwrap_or_else(Self::default_path),
            Path::to_path_buf,
        );
        let is_explicit_path = path.is_some() || env_config.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ScanError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(ScanError::InvalidConfig {
                details: format!("config file not found at {}", path_buf.display()),
            });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        set_env_f64(
            "FOLDERDUPE_SIMILARITY_THRESHOLD",
            &mut self.similarity.threshold,
        )?;
        set_env_u64(
            "FOLDERDUPE_SIZE_BUCKET_BYTES",
            &mut self.similarity.size_bucket_bytes,
        )?;
        set_env_usize(
            "FOLDERDUPE_WORKER_THREADS",
            &mut self.walker.worker_threads,
        )?;
        set_env_usize(
            "FOLDERDUPE_MAX_CONCURRENT_SCANS",
            &mut self.job.max_concurrent_scans,
        )?;
        set_env_bool(
            "FOLDERDUPE_FORCE_CASE_INSENSITIVE",
            &mut self.walker.force_case_insensitive,
        )?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity.threshold) {
            return Err(ScanError::InvalidConfig {
                details: format!(
                    "similarity.threshold must be in [0, 1], got {}",
                    self.similarity.threshold
                ),
            });
        }
        if self.similarity.size_bucket_bytes == 0 {
            return Err(ScanError::InvalidConfig {
                details: "similarity.size_bucket_bytes must be > 0".to_string(),
            });
        }
        if self.job.max_concurrent_scans == 0 {
            return Err(ScanError::InvalidConfig {
                details: "job.max_concurrent_scans must be > 0".to_string(),
            });
        }
        for pattern in &self.walker.exclude_globs {
            glob::Pattern::new(pattern).map_err(|error| ScanError::InvalidConfig {
                details: format!("invalid exclude glob {pattern:?}: {error}"),
            })?;
        }
        Ok(())
    }

    /// Resolved worker thread count: `min(32, 2 * available_parallelism())`
    /// unless explicitly overridden.
    #[must_use]
    pub fn resolved_worker_threads(&self) -> usize {
        if self.walker.worker_threads > 0 {
            return self.walker.worker_threads;
        }
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        (2 * cpus).min(32)
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env_f64(name: &str, slot: &mut f64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<f64>().map_err(|error| ScanError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<u64>().map_err(|error| ScanError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_usize(name: &str, slot: &mut usize) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse::<usize>()
            .map_err(|error| ScanError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_env_bool(name: &str, slot: &mut bool) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(ScanError::ConfigParse {
                    context: "env",
                    details: format!("{name}={other:?}: expected boolean"),
                });
            }
        };
    }
    Ok(())
}
