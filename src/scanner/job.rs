//! Scan Job Manager: per-scan state machine, phase timing, progress
//! projection, and the bounded job pool that runs scans concurrently.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::core::config::{Config, SimilarityConfig, WalkerConfig};
use crate::core::errors::{Result, ScanError};
use crate::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, ScanLogEvent, spawn_logger};
use crate::logger::jsonl::JsonlConfig;
use crate::scanner::aggregator;
#[cfg(feature = "sqlite")]
use crate::scanner::cache::HashCache;
use crate::scanner::events::{ScanEvent, ScanEventHandle, ScanPhase};
use crate::scanner::resource::capture_resource_sample;
use crate::scanner::similarity;
use crate::scanner::suppressor;
use crate::scanner::types::{
    FolderLabel, GroupRecord, PhaseProgress, PhaseStatus, PhaseTiming, ResourceSample, ScanMetrics,
    ScanProgress, ScanRequest, ScanStats, ScanStatus, WarningRecord, WarningType,
};
use crate::scanner::walker::{self, CacheHandle};

const PHASE_ORDER: [&str; 3] = ["walking", "aggregating", "grouping"];

struct JobState {
    scan_id: String,
    request: ScanRequest,
    status: ScanStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    warnings: Vec<WarningRecord>,
    stats: ScanStats,
    error: Option<String>,
    last_path: Option<String>,
    groups: Vec<GroupRecord>,
    phase_timings: Vec<PhaseTiming>,
    phase_sequence: Vec<String>,
    current_phase: Option<String>,
    resource_samples: Vec<ResourceSample>,
}

impl JobState {
    fn new(scan_id: String, request: ScanRequest) -> Self {
        Self {
            scan_id,
            request,
            status: ScanStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            warnings: Vec::new(),
            stats: ScanStats::default(),
            error: None,
            last_path: None,
            groups: Vec::new(),
            phase_timings: Vec::new(),
            phase_sequence: Vec::new(),
            current_phase: None,
            resource_samples: Vec::new(),
        }
    }

    fn set_phase(&mut self, name: &str) {
        if self.current_phase.as_deref() == Some(name) {
            return;
        }
        if self.current_phase.is_some() {
            self.finish_phase(None);
        }
        self.phase_timings.push(PhaseTiming {
            phase: name.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
        });
        self.phase_sequence.push(name.to_string());
        self.current_phase = Some(name.to_string());
        self.resource_samples.push(capture_resource_sample());
    }

    fn finish_phase(&mut self, name: Option<&str>) {
        let Some(target) = name.map(str::to_string).or_else(|| self.current_phase.clone()) else {
            return;
        };
        if let Some(timing) = self
            .phase_timings
            .iter_mut()
            .rev()
            .find(|t| t.phase == target && t.completed_at.is_none())
        {
            let now = Utc::now();
            timing.completed_at = Some(now);
            timing.duration_seconds =
                Some((now - timing.started_at).num_milliseconds() as f64 / 1000.0);
        }
        if name.is_none() || self.current_phase.as_deref() == Some(target.as_str()) {
            self.current_phase = None;
        }
        self.resource_samples.push(capture_resource_sample());
    }
}

struct ManagerShared {
    config: Config,
    cache: Option<Arc<CacheHandle>>,
    logger: ActivityLoggerHandle,
    jobs: Mutex<HashMap<String, Arc<Mutex<JobState>>>>,
    history_order: Mutex<VecDeque<String>>,
    history_capacity: usize,
    id_seq: AtomicU64,
}

impl ManagerShared {
    fn find(&self, scan_id: &str) -> Result<Arc<Mutex<JobState>>> {
        self.jobs
            .lock()
            .get(scan_id)
            .cloned()
            .ok_or_else(|| ScanError::JobNotFound {
                scan_id: scan_id.to_string(),
            })
    }

    fn retire(&self, scan_id: &str) {
        let mut order = self.history_order.lock();
        order.push_back(scan_id.to_string());
        while order.len() > self.history_capacity {
            if let Some(oldest) = order.pop_front() {
                self.jobs.lock().remove(&oldest);
            }
        }
    }
}

/// Coordinates scan jobs: accepts requests, runs at most
/// `config.job.max_concurrent_scans` scans in parallel, and exposes
/// read-only progress/result views.
pub struct ScanJobManager {
    shared: Arc<ManagerShared>,
    task_tx: Sender<String>,
    workers: Vec<JoinHandle<()>>,
    logger_join: Option<JoinHandle<()>>,
}

impl ScanJobManager {
    /// Build a manager, opening the hash cache at `config.paths.hash_cache_db`
    /// when the `sqlite` feature is enabled, and spawning the dual-write
    /// activity logger at `config.paths.sqlite_log`/`config.paths.jsonl_log`.
    pub fn new(config: Config) -> Result<Self> {
        #[cfg(feature = "sqlite")]
        let cache = Some(Arc::new(HashCache::open(&config.paths.hash_cache_db)?));
        #[cfg(not(feature = "sqlite"))]
        let cache: Option<Arc<CacheHandle>> = None;

        let worker_count = config.job.max_concurrent_scans.max(1);
        let history_capacity = config.job.history_capacity;

        let logger_config = DualLoggerConfig {
            #[cfg(feature = "sqlite")]
            sqlite_path: Some(config.paths.sqlite_log.clone()),
            #[cfg(not(feature = "sqlite"))]
            sqlite_path: None,
            jsonl_config: JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                ..JsonlConfig::default()
            },
            ..DualLoggerConfig::default()
        };
        let (logger, logger_join) = spawn_logger(logger_config)?;

        let shared = Arc::new(ManagerShared {
            config,
            cache,
            logger,
            jobs: Mutex::new(HashMap::new()),
            history_order: Mutex::new(VecDeque::new()),
            history_capacity,
            id_seq: AtomicU64::new(0),
        });

        let (task_tx, task_rx): (Sender<String>, Receiver<String>) = unbounded();
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let shared = Arc::clone(&shared);
            let task_rx = task_rx.clone();
            workers.push(thread::spawn(move || {
                while let Ok(scan_id) = task_rx.recv() {
                    run_scan(&shared, &scan_id);
                }
            }));
        }

        Ok(Self {
            shared,
            task_tx,
            workers,
            logger_join: Some(logger_join),
        })
    }

    /// Submit a scan request. Fails synchronously (no job is created) if the
    /// root path is not a directory.
    pub fn start_scan(&self, request: ScanRequest) -> Result<String> {
        if !request.root_path.is_dir() {
            return Err(ScanError::InvalidRoot {
                path: request.root_path,
            });
        }

        let scan_id = generate_scan_id(&self.shared.id_seq);
        let job = Arc::new(Mutex::new(JobState::new(scan_id.clone(), request)));
        self.shared.jobs.lock().insert(scan_id.clone(), job);

        self.task_tx
            .send(scan_id.clone())
            .map_err(|_| ScanError::ChannelClosed {
                component: "scan_job_manager",
            })?;

        Ok(scan_id)
    }

    /// All known scan ids, most recently created order is not guaranteed.
    #[must_use]
    pub fn list_jobs(&self) -> Vec<String> {
        self.shared.jobs.lock().keys().cloned().collect()
    }

    /// Current status of a job.
    pub fn get_job_status(&self, scan_id: &str) -> Result<ScanStatus> {
        Ok(self.shared.find(scan_id)?.lock().status)
    }

    /// Derived progress view for `scan_id`.
    pub fn get_progress(&self, scan_id: &str) -> Result<ScanProgress> {
        let job = self.shared.find(scan_id)?;
        let job = job.lock();
        Ok(build_progress(&job))
    }

    /// Completed groups for `scan_id`, optionally filtered by label. Errors
    /// unless the job has reached a terminal `COMPLETED` state.
    pub fn get_groups(&self, scan_id: &str, label: Option<FolderLabel>) -> Result<Vec<GroupRecord>> {
        let job = self.shared.find(scan_id)?;
        let job = job.lock();
        if job.status != ScanStatus::Completed {
            return Err(ScanError::ScanNotComplete {
                scan_id: scan_id.to_string(),
            });
        }
        Ok(match label {
            Some(label) => job
                .groups
                .iter()
                .filter(|g| g.label == label)
                .cloned()
                .collect(),
            None => job.groups.clone(),
        })
    }

    /// Phase timings and resource samples collected so far for `scan_id`.
    pub fn get_metrics(&self, scan_id: &str) -> Result<ScanMetrics> {
        let job = self.shared.find(scan_id)?;
        let job = job.lock();
        Ok(ScanMetrics {
            scan_id: job.scan_id.clone(),
            root_path: job.request.root_path.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            worker_count: job.stats.workers,
            bytes_scanned: job.stats.bytes_scanned,
            phase_timings: job.phase_timings.clone(),
            resource_samples: job.resource_samples.clone(),
        })
    }

    /// Stop accepting new work, wait for in-flight scans to finish, and drain
    /// the activity logger.
    pub fn shutdown(mut self) {
        let logger_join = self.logger_join.take();
        let Self {
            shared,
            task_tx,
            workers,
            logger_join: _,
        } = self;
        drop(task_tx);
        for worker in workers {
            let _ = worker.join();
        }
        shared.logger.shutdown();
        if let Some(join) = logger_join {
            let _ = join.join();
        }
    }
}

fn generate_scan_id(seq: &AtomicU64) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let ordinal = seq.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(ordinal.to_le_bytes());
    let digest = hasher.finalize();
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

fn run_scan(shared: &Arc<ManagerShared>, scan_id: &str) {
    let Ok(job_arc) = shared.find(scan_id) else {
        return;
    };

    let request = job_arc.lock().request.clone();
    shared.logger.send(ScanLogEvent::ScanStarted {
        scan_id: scan_id.to_string(),
        root_path: request.root_path.display().to_string(),
    });
    {
        let mut job = job_arc.lock();
        job.stats.workers = request.resolved_concurrency();
        job.set_phase(ScanPhase::Walking.label());
    }
    shared.logger.send(ScanLogEvent::PhaseEntered {
        scan_id: scan_id.to_string(),
        phase: ScanPhase::Walking.label().to_string(),
    });

    // Per-scan overrides layer on top of the manager-wide config rather than
    // mutating it, so concurrent scans with different requests never clobber
    // each other's equality mode, structure policy, or threshold.
    let walker_config = WalkerConfig {
        file_equality: request.file_equality,
        structure_policy: request.structure_policy,
        force_case_insensitive: request.force_case_insensitive,
        ..shared.config.walker.clone()
    };
    let similarity_config = SimilarityConfig {
        threshold: request.similarity_threshold,
        ..shared.config.similarity.clone()
    };

    let (handle, rx) = ScanEventHandle::new(crate::scanner::events::CHANNEL_CAPACITY);

    let outcome = thread::scope(|scope| {
        let consumer_job = Arc::clone(&job_arc);
        scope.spawn(move || consume_events(&consumer_job, rx));

        let walk_result = walker::walk(
            &request,
            &walker_config,
            shared.cache.as_deref(),
            &handle,
        );

        match walk_result {
            Ok(mut outcome_value) => {
                {
                    let mut job = job_arc.lock();
                    job.warnings.extend(outcome_value.warnings.drain(..));
                    job.stats.folders_scanned = outcome_value.folders_scanned;
                    job.stats.total_folders = outcome_value.folders_scanned;
                    job.finish_phase(Some(ScanPhase::Walking.label()));
                    job.set_phase(ScanPhase::Aggregating.label());
                }
                log_phase_transition(shared, scan_id, &job_arc, ScanPhase::Walking, ScanPhase::Aggregating);

                aggregator::aggregate_fingerprints(&mut outcome_value.fingerprints, &handle);

                {
                    let mut job = job_arc.lock();
                    job.finish_phase(Some(ScanPhase::Aggregating.label()));
                    job.set_phase(ScanPhase::Grouping.label());
                    job.stats.similarity_pairs_total = similarity::total_candidate_pairs(
                        &outcome_value.fingerprints,
                        &similarity_config,
                    );
                }
                log_phase_transition(shared, scan_id, &job_arc, ScanPhase::Aggregating, ScanPhase::Grouping);

                let groups = similarity::compute_similarity_groups(
                    &outcome_value.fingerprints,
                    &similarity_config,
                    &handle,
                );
                let records: Vec<GroupRecord> = groups
                    .iter()
                    .map(|group| {
                        similarity::classify_and_finalize(
                            group,
                            &outcome_value.fingerprints,
                            &similarity_config,
                        )
                    })
                    .collect();
                let kept = suppressor::suppress_descendant_groups(records);

                {
                    let mut job = job_arc.lock();
                    job.finish_phase(Some(ScanPhase::Grouping.label()));
                }
                log_phase_completed(shared, scan_id, &job_arc, ScanPhase::Grouping);

                handle.shutdown();
                Ok(kept)
            }
            Err(error) => {
                handle.shutdown();
                Err(error)
            }
        }
    });

    let mut job = job_arc.lock();
    job.completed_at = Some(Utc::now());
    match outcome {
        Ok(groups) => {
            job.groups = groups;
            job.status = ScanStatus::Completed;
            shared.logger.send(ScanLogEvent::ScanCompleted {
                scan_id: scan_id.to_string(),
                group_count: job.groups.len(),
                bytes_scanned: job.stats.bytes_scanned,
                duration_ms: elapsed_ms(job.started_at, job.completed_at.unwrap_or_else(Utc::now)),
            });
        }
        Err(error) => {
            if job.stats.files_scanned > 0 || !job.groups.is_empty() {
                job.status = ScanStatus::Completed;
                job.warnings.push(WarningRecord {
                    path: job.request.root_path.clone(),
                    kind: WarningType::IoError,
                    message: error.to_string(),
                });
                shared.logger.send(ScanLogEvent::WarningRaised {
                    scan_id: scan_id.to_string(),
                    path: job.request.root_path.display().to_string(),
                    message: error.to_string(),
                });
                shared.logger.send(ScanLogEvent::ScanCompleted {
                    scan_id: scan_id.to_string(),
                    group_count: job.groups.len(),
                    bytes_scanned: job.stats.bytes_scanned,
                    duration_ms: elapsed_ms(job.started_at, job.completed_at.unwrap_or_else(Utc::now)),
                });
            } else {
                shared.logger.send(ScanLogEvent::ScanFailed {
                    scan_id: scan_id.to_string(),
                    error_code: error.code().to_string(),
                    error_message: error.to_string(),
                });
                job.status = ScanStatus::Failed;
                job.error = Some(error.to_string());
            }
        }
    }
    job.finish_phase(None);
    drop(job);

    shared.retire(scan_id);
}

fn consume_events(job_arc: &Arc<Mutex<JobState>>, rx: Receiver<ScanEvent>) {
    for event in rx.iter() {
        let mut job = job_arc.lock();
        match event {
            ScanEvent::PhaseEntered { .. } | ScanEvent::PhaseCompleted { .. } => {}
            ScanEvent::FileScanned { bytes, .. } => {
                job.stats.files_scanned += 1;
                job.stats.bytes_scanned += bytes;
            }
            ScanEvent::FolderDiscovered { path } => {
                job.stats.folders_discovered += 1;
                job.last_path = Some(path);
            }
            ScanEvent::FolderAggregated => {
                job.stats.folders_aggregated += 1;
            }
            ScanEvent::PairEvaluated => {
                job.stats.similarity_pairs_processed += 1;
            }
            ScanEvent::Warning {
                kind,
                path,
                message,
            } => {
                job.warnings.push(WarningRecord {
                    path: path.map_or_else(|| job.request.root_path.clone(), std::path::PathBuf::from),
                    kind: warning_kind_from_label(&kind),
                    message,
                });
            }
            ScanEvent::Shutdown => break,
        }
    }
}

fn warning_kind_from_label(label: &str) -> WarningType {
    match label {
        "Permission" => WarningType::Permission,
        "Unstable" => WarningType::Unstable,
        _ => WarningType::IoError,
    }
}

/// Mirror a `from_phase -> to_phase` transition to the activity logger,
/// attaching the just-finished phase's wall-clock duration.
fn log_phase_transition(
    shared: &Arc<ManagerShared>,
    scan_id: &str,
    job_arc: &Arc<Mutex<JobState>>,
    from_phase: ScanPhase,
    to_phase: ScanPhase,
) {
    log_phase_completed(shared, scan_id, job_arc, from_phase);
    shared.logger.send(ScanLogEvent::PhaseEntered {
        scan_id: scan_id.to_string(),
        phase: to_phase.label().to_string(),
    });
}

fn log_phase_completed(
    shared: &Arc<ManagerShared>,
    scan_id: &str,
    job_arc: &Arc<Mutex<JobState>>,
    phase: ScanPhase,
) {
    shared.logger.send(ScanLogEvent::PhaseCompleted {
        scan_id: scan_id.to_string(),
        phase: phase.label().to_string(),
        duration_ms: phase_duration_ms(job_arc, phase.label()),
    });
}

fn phase_duration_ms(job_arc: &Arc<Mutex<JobState>>, phase: &str) -> u64 {
    let job = job_arc.lock();
    job.phase_timings
        .iter()
        .rev()
        .find(|t| t.phase == phase)
        .and_then(|t| t.duration_seconds)
        .map_or(0, |secs| (secs * 1000.0).round() as u64)
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

fn build_progress(job: &JobState) -> ScanProgress {
    let folders_discovered = job.stats.folders_discovered.max(1);
    let scanned_for_ratio = if job.stats.folders_scanned > 0 {
        job.stats.folders_scanned
    } else {
        0
    };
    let discovered_for_ratio = job
        .stats
        .folders_discovered
        .max(if job.stats.folders_scanned > 0 {
            job.stats.folders_scanned
        } else {
            1
        });
    let walking_ratio = scanned_for_ratio as f64 / discovered_for_ratio as f64;

    let aggregating_ratio = if job.stats.total_folders > 0 {
        Some((job.stats.folders_aggregated as f64 / job.stats.total_folders as f64).clamp(0.0, 1.0))
    } else {
        None
    };

    let grouping_ratio = if job.stats.similarity_pairs_total > 0 {
        Some(
            (job.stats.similarity_pairs_processed as f64 / job.stats.similarity_pairs_total as f64)
                .clamp(0.0, 1.0),
        )
    } else {
        None
    };

    let (progress, eta_seconds) = match job.status {
        ScanStatus::Completed => (Some(1.0), Some(0)),
        ScanStatus::Running => {
            let mut overall = 0.4 * walking_ratio;
            if let Some(ratio) = aggregating_ratio {
                overall += 0.3 * ratio;
            }
            if let Some(ratio) = grouping_ratio {
                overall += 0.3 * ratio;
            }
            let progress = if overall > 0.0 {
                Some(overall.clamp(0.05, 0.99))
            } else {
                None
            };

            let elapsed = (Utc::now() - job.started_at).num_milliseconds() as f64 / 1000.0;
            let eta = if elapsed > 0.0 && job.stats.folders_scanned > 0 {
                let rate = job.stats.folders_scanned as f64 / elapsed;
                let remaining =
                    (job.stats.folders_discovered as i64 - job.stats.folders_scanned as i64).max(0);
                if rate > 0.0 {
                    Some((remaining as f64 / rate) as i64)
                } else {
                    None
                }
            } else {
                None
            };
            (progress, eta)
        }
        ScanStatus::Pending | ScanStatus::Failed => (None, None),
    };

    let phases = PHASE_ORDER
        .iter()
        .map(|&name| {
            let (status, ratio) = phase_status(
                job,
                name,
                walking_ratio,
                aggregating_ratio,
                grouping_ratio,
            );
            PhaseProgress {
                name: name.to_string(),
                status,
                progress: ratio,
            }
        })
        .collect();

    let mut stats = std::collections::BTreeMap::new();
    stats.insert("files_scanned".to_string(), job.stats.files_scanned);
    stats.insert("folders_scanned".to_string(), job.stats.folders_scanned);
    stats.insert(
        "folders_discovered".to_string(),
        job.stats.folders_discovered,
    );
    stats.insert("bytes_scanned".to_string(), job.stats.bytes_scanned);
    stats.insert("workers".to_string(), job.stats.workers as u64);
    if job.stats.total_folders > 0 {
        stats.insert("total_folders".to_string(), job.stats.total_folders);
        stats.insert(
            "folders_aggregated".to_string(),
            job.stats.folders_aggregated,
        );
    }
    if job.stats.similarity_pairs_total > 0 {
        stats.insert(
            "similarity_pairs_total".to_string(),
            job.stats.similarity_pairs_total,
        );
        stats.insert(
            "similarity_pairs_processed".to_string(),
            job.stats.similarity_pairs_processed,
        );
    }
    let _ = folders_discovered;

    ScanProgress {
        scan_id: job.scan_id.clone(),
        status: job.status,
        started_at: job.started_at,
        completed_at: job.completed_at,
        warnings: job.warnings.clone(),
        root_path: job.request.root_path.clone(),
        stats,
        progress,
        eta_seconds,
        phase: job.current_phase.clone().unwrap_or_default(),
        last_path: job.last_path.clone(),
        phases,
        include_matrix: job.request.include_matrix,
        include_treemap: job.request.include_treemap,
    }
}

fn phase_status(
    job: &JobState,
    name: &str,
    walking_ratio: f64,
    aggregating_ratio: Option<f64>,
    grouping_ratio: Option<f64>,
) -> (PhaseStatus, Option<f64>) {
    if job.status == ScanStatus::Completed {
        return (PhaseStatus::Completed, Some(1.0));
    }
    if job.status == ScanStatus::Pending {
        return (PhaseStatus::Pending, None);
    }

    if job.current_phase.as_deref() == Some(name) {
        let ratio = match name {
            "walking" => Some(walking_ratio),
            "aggregating" => aggregating_ratio,
            "grouping" => grouping_ratio,
            _ => None,
        };
        return (PhaseStatus::Running, ratio);
    }

    let current_idx = job
        .current_phase
        .as_deref()
        .and_then(|current| PHASE_ORDER.iter().position(|&p| p == current));
    let name_idx = PHASE_ORDER.iter().position(|&p| p == name).unwrap_or(0);

    match current_idx {
        Some(current_idx) if current_idx > name_idx => (PhaseStatus::Completed, Some(1.0)),
        Some(_) => (PhaseStatus::Pending, None),
        None => {
            if job.phase_sequence.iter().any(|p| p == name) {
                (PhaseStatus::Completed, Some(1.0))
            } else {
                (PhaseStatus::Pending, None)
            }
        }
    }
}
