//! Wire-facing data model: scan requests, per-folder records, progress views,
//! and the plain-struct interfaces reserved for out-of-scope collaborators.
//!
//! Everything here derives `serde::{Serialize, Deserialize}` so a future HTTP
//! surface can hang off these types without reshaping them.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::{FileEqualityMode, StructurePolicy};
use crate::core::paths::resolve_absolute_path;

fn default_similarity_threshold() -> f64 {
    0.80
}

/// Submitted scan configuration. `root_path` is normalized to an absolute,
/// canonicalized path on construction, mirroring `ScanRequest.normalize_root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub root_path: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub file_equality: FileEqualityMode,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub force_case_insensitive: bool,
    #[serde(default)]
    pub structure_policy: StructurePolicy,
    /// Worker pool override in `[1, 32]`. `None` resolves to `min(32, 2*cpus)`.
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub deletion_enabled: bool,
    #[serde(default)]
    pub include_matrix: bool,
    #[serde(default)]
    pub include_treemap: bool,
}

impl ScanRequest {
    /// Build a request for `root`, normalizing the path and taking every
    /// other field at its default.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root_path: resolve_absolute_path(root.as_ref()),
            include: Vec::new(),
            exclude: Vec::new(),
            file_equality: FileEqualityMode::NameSize,
            similarity_threshold: default_similarity_threshold(),
            force_case_insensitive: false,
            structure_policy: StructurePolicy::Relative,
            concurrency: None,
            deletion_enabled: false,
            include_matrix: false,
            include_treemap: false,
        }
    }

    /// Effective worker pool size: `min(32, 2 * cpus)` unless overridden.
    #[must_use]
    pub fn resolved_concurrency(&self) -> usize {
        if let Some(n) = self.concurrency {
            return n.clamp(1, 32);
        }
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        (2 * cpus).min(32)
    }
}

/// One directory visited by the walker. `total_bytes`/`file_count` start as
/// the folder's own (pre-aggregation) totals and are overwritten in place by
/// the aggregator once the recursive rollup completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderInfo {
    pub path: String,
    pub relative_path: String,
    pub total_bytes: u64,
    pub file_count: usize,
    pub unstable: bool,
}

/// A kept file, walker-internal — never serialized to a caller.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub mtime_nanos: i64,
    pub sha256: Option<String>,
}

/// A folder's content fingerprint: its own (or, post-aggregation, recursive)
/// `identity -> bytes` weight map, paired with the `FolderInfo` it describes.
#[derive(Debug, Clone)]
pub struct DirectoryFingerprint {
    pub folder: FolderInfo,
    pub file_weights: BTreeMap<String, u64>,
}

/// How a file contributed to its enclosing folder, and why — surfaced only
/// in warnings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningType {
    Permission,
    Unstable,
    IoError,
}

/// A non-fatal condition surfaced on the owning job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningRecord {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: WarningType,
    pub message: String,
}

/// One edge in a `SimilarityGroup`'s induced graph: `members[a]` and
/// `members[b]` scored `similarity`, with `a < b`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PairwiseSimilarity {
    pub a: usize,
    pub b: usize,
    pub similarity: f64,
}

/// A connected cluster of similar folders, pre-labeling. Internal to the
/// similarity engine; `group_to_record` turns it into a `GroupRecord`.
#[derive(Debug, Clone)]
pub struct SimilarityGroup {
    pub members: Vec<FolderInfo>,
    pub similarity_pairs: Vec<PairwiseSimilarity>,
}

impl SimilarityGroup {
    /// Largest edge weight in the group, or 0.0 for a degenerate singleton.
    #[must_use]
    pub fn max_similarity(&self) -> f64 {
        self.similarity_pairs
            .iter()
            .map(|pair| pair.similarity)
            .fold(0.0_f64, f64::max)
    }
}

/// Classification assigned to a merged `SimilarityGroup`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FolderLabel {
    Identical,
    NearDuplicate,
    PartialOverlap,
}

/// One of the top divergent identities between two members of a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DivergenceRecord {
    pub path_a: String,
    pub path_b: String,
    pub delta_bytes: u64,
}

/// A finalized, caller-visible duplicate/near-duplicate group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: String,
    pub label: FolderLabel,
    pub canonical_path: String,
    pub members: Vec<FolderInfo>,
    pub pairwise_similarity: Vec<PairwiseSimilarity>,
    pub divergences: Vec<DivergenceRecord>,
    /// Reserved: always `false`. Suppression is expressed by omission from
    /// the result list, not by flagging a surviving record.
    pub suppressed_descendants: bool,
}

/// Lifecycle state of a `ScanJob`. Terminal once `Completed`/`Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-phase status reported in `ScanProgress::phases`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
}

/// Progress of a single named phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub name: String,
    pub status: PhaseStatus,
    pub progress: Option<f64>,
}

/// Wall-clock bounds of one phase entry. One entry per phase in the order it
/// was entered; `completed_at`/`duration_seconds` are filled on exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

/// A point-in-time resource snapshot, captured on every phase transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceStats {
    pub cpu_cores: usize,
    pub load_1m: f64,
    pub process_rss_bytes: u64,
    pub process_read_bytes: Option<u64>,
    pub process_write_bytes: Option<u64>,
}

/// A `ResourceStats` stamped with the moment it was captured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSample {
    #[serde(flatten)]
    pub stats: ResourceStats,
    pub timestamp: DateTime<Utc>,
}

/// Running counters driving progress projection, the scan-domain replacement
/// for the original's string-keyed stats map (see `scanner::events`).
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub folders_scanned: u64,
    pub folders_discovered: u64,
    pub bytes_scanned: u64,
    pub workers: usize,
    pub total_folders: u64,
    pub folders_aggregated: u64,
    pub similarity_pairs_total: u64,
    pub similarity_pairs_processed: u64,
}

/// Derived, read-only view of a job's progress. Never stored; recomputed by
/// `ScanJobManager::get_progress` from the job's current stats snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub scan_id: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub warnings: Vec<WarningRecord>,
    pub root_path: PathBuf,
    pub stats: BTreeMap<String, u64>,
    pub progress: Option<f64>,
    pub eta_seconds: Option<i64>,
    pub phase: String,
    pub last_path: Option<String>,
    pub phases: Vec<PhaseProgress>,
    pub include_matrix: bool,
    pub include_treemap: bool,
}

/// Read-only view joining `phase_timings` and `resource_samples` for a job,
/// exposed by `ScanJobManager::get_metrics`. Part of the manager's own query
/// surface, not a Prometheus-style exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub scan_id: String,
    pub root_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_count: usize,
    pub bytes_scanned: u64,
    pub phase_timings: Vec<PhaseTiming>,
    pub resource_samples: Vec<ResourceSample>,
}

// ──────────────────── interface-only stub types ────────────────────
//
// The collaborators that would consume these remain out of scope (HTTP
// surface, export renderers, analytics views, deletion executor). The shapes
// are kept so the job manager's boundary stays well-typed.

/// A single identity present only on one side of a `GroupDiff`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: String,
    pub bytes: u64,
}

/// A single identity present on both sides of a `GroupDiff` with differing
/// byte counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MismatchEntry {
    pub path: String,
    pub left_bytes: u64,
    pub right_bytes: u64,
}

/// Pairwise content diff between two group members. Computed by the pure
/// function `compute_fingerprint_diff` in `scanner::aggregator`; no
/// renderer consumes it in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDiff {
    pub left: FolderInfo,
    pub right: FolderInfo,
    pub only_left: Vec<DiffEntry>,
    pub only_right: Vec<DiffEntry>,
    pub mismatched: Vec<MismatchEntry>,
}

/// One file entry within `GroupContents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderEntry {
    pub path: String,
    pub bytes: u64,
}

/// One member's full identity listing within `GroupContents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberContents {
    pub relative_path: String,
    pub entries: Vec<FolderEntry>,
}

/// Full per-member content listing for a group. Data-only; no renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupContents {
    pub group_id: String,
    pub canonical: MemberContents,
    pub duplicates: Vec<MemberContents>,
}

/// Caller-supplied set of relative paths to enqueue for quarantine deletion.
/// No executor is implemented; deletion remains out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionPlanPayload {
    pub paths: Vec<String>,
}

/// A proposed (unexecuted) quarantine deletion plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionPlan {
    pub plan_id: String,
    pub token: String,
    pub reclaimable_bytes: u64,
    pub queue: Vec<String>,
    pub root: PathBuf,
    pub quarantine_root: PathBuf,
    pub expires_at: DateTime<Utc>,
}

/// Result of executing a `DeletionPlan`. No executor produces this value in
/// this crate; the shape exists for the boundary only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResult {
    pub plan_id: String,
    pub moved_count: u64,
    pub bytes_moved: u64,
    pub quarantine_root: PathBuf,
    pub root: PathBuf,
}

/// One row of the (unimplemented) similarity matrix view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityMatrixEntry {
    pub group_id: String,
    pub label: FolderLabel,
    pub left: FolderInfo,
    pub right: FolderInfo,
    pub similarity: f64,
    pub combined_bytes: u64,
    pub reclaimable_bytes: u64,
}

/// One node of the (unimplemented) density treemap view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreemapNode {
    pub path: String,
    pub name: String,
    pub total_bytes: u64,
    pub duplicate_bytes: u64,
    pub identical_groups: u64,
    pub near_groups: u64,
    pub children: Vec<TreemapNode>,
}
