//! Typed progress channel: a tagged union of scan events consumed by the job
//! manager, replacing ad-hoc shared stats/meta maps.
//!
//! Mirrors the dual-write logger's `ActivityEvent`/`ActivityLoggerHandle`
//! split: worker threads push events through a bounded, non-blocking sender;
//! a single consumer (here, the job manager's progress tracker) drains them.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Default bounded channel capacity for scan progress events.
pub const CHANNEL_CAPACITY: usize = 4096;

/// Events emitted by the walker, aggregator, and similarity engine as a scan
/// progresses. Consumed by `ScanJobManager` to derive `ScanProgress` and
/// append `WarningRecord`s without either side touching shared mutable state.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A scan phase was entered. Used to stamp `PhaseTiming::started_at` and
    /// capture a resource sample.
    PhaseEntered { phase: ScanPhase },
    /// A scan phase finished. Used to stamp `completed_at`/`duration_seconds`.
    PhaseCompleted { phase: ScanPhase },
    /// A single file finished being processed by the walker.
    FileScanned {
        bytes: u64,
        cache_hit: bool,
    },
    /// A folder's own (pre-aggregation) fingerprint has been built.
    FolderDiscovered { path: String },
    /// A folder's fingerprint finished the aggregation pass.
    FolderAggregated,
    /// One candidate pair was scored by the similarity engine.
    PairEvaluated,
    /// A non-fatal condition worth surfacing to the caller (unstable file,
    /// permission denial, partial I/O failure).
    Warning {
        kind: String,
        path: Option<String>,
        message: String,
    },
    /// Sentinel requesting the consuming loop to stop.
    Shutdown,
}

/// The three phases of a scan, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Walking,
    Aggregating,
    Grouping,
}

impl ScanPhase {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Walking => "walking",
            Self::Aggregating => "aggregating",
            Self::Grouping => "grouping",
        }
    }
}

/// Thread-safe, cheaply-cloneable handle for emitting scan events.
///
/// `send` uses `try_send`, so producers are never blocked by a slow or
/// stalled consumer; a full channel increments `dropped_events` instead.
#[derive(Clone)]
pub struct ScanEventHandle {
    tx: Sender<ScanEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ScanEventHandle {
    /// Create a bounded channel pair: a handle for producers and a receiver
    /// for the single consumer (the job manager's progress-tracking loop).
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<ScanEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Send an event. Non-blocking; drops and counts on back-pressure.
    pub fn send(&self, event: ScanEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to channel back-pressure.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request the consumer loop to stop.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ScanEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_receive_roundtrip() {
        let (handle, rx) = ScanEventHandle::new(8);
        handle.send(ScanEvent::FileScanned {
            bytes: 42,
            cache_hit: false,
        });
        match rx.recv().unwrap() {
            ScanEvent::FileScanned { bytes, cache_hit } => {
                assert_eq!(bytes, 42);
                assert!(!cache_hit);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn full_channel_drops_and_counts() {
        let (handle, _rx) = ScanEventHandle::new(1);
        handle.send(ScanEvent::PairEvaluated);
        handle.send(ScanEvent::PairEvaluated);
        assert_eq!(handle.dropped_events(), 1);
    }

    #[test]
    fn shutdown_is_observable_by_consumer() {
        let (handle, rx) = ScanEventHandle::new(4);
        handle.shutdown();
        assert!(matches!(rx.recv().unwrap(), ScanEvent::Shutdown));
    }

    #[test]
    fn phase_labels_match_expected_strings() {
        assert_eq!(ScanPhase::Walking.label(), "walking");
        assert_eq!(ScanPhase::Aggregating.label(), "aggregating");
        assert_eq!(ScanPhase::Grouping.label(), "grouping");
    }
}
