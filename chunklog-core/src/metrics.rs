//! # Metrics
//!
//! Counters collected over a scavenge run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct ScavengeMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Accumulation
    records_accumulated: AtomicU64,
    collisions: AtomicU64,

    // Calculation
    streams_calculated: AtomicU64,

    // Chunk execution
    chunks_scavenged: AtomicU64,
    chunks_skipped: AtomicU64,
    chunks_removed: AtomicU64,
    records_kept: AtomicU64,
    records_discarded: AtomicU64,
    space_saved: AtomicU64,

    // Index execution
    index_entries_kept: AtomicU64,
    index_entries_discarded: AtomicU64,
}

impl ScavengeMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accumulated(&self, records: u64) {
        self.inner.records_accumulated.fetch_add(records, Ordering::Relaxed);
    }

    pub fn update_collisions(&self, count: u64) {
        self.inner.collisions.store(count, Ordering::Relaxed);
    }

    pub fn record_streams_calculated(&self, streams: u64) {
        self.inner.streams_calculated.fetch_add(streams, Ordering::Relaxed);
    }

    /// Record a rewritten chunk
    pub fn record_chunk_scavenged(&self, kept: u64, discarded: u64, space_saved: i64) {
        self.inner.chunks_scavenged.fetch_add(1, Ordering::Relaxed);
        self.inner.records_kept.fetch_add(kept, Ordering::Relaxed);
        self.inner.records_discarded.fetch_add(discarded, Ordering::Relaxed);
        if space_saved > 0 {
            self.inner.space_saved.fetch_add(space_saved as u64, Ordering::Relaxed);
        }
    }

    pub fn record_chunk_skipped(&self) {
        self.inner.chunks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_removed(&self) {
        self.inner.chunks_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_entry(&self, kept: bool) {
        if kept {
            self.inner.index_entries_kept.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.index_entries_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn space_saved(&self) -> u64 {
        self.inner.space_saved.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_accumulated: self.inner.records_accumulated.load(Ordering::Relaxed),
            collisions: self.inner.collisions.load(Ordering::Relaxed),
            streams_calculated: self.inner.streams_calculated.load(Ordering::Relaxed),
            chunks_scavenged: self.inner.chunks_scavenged.load(Ordering::Relaxed),
            chunks_skipped: self.inner.chunks_skipped.load(Ordering::Relaxed),
            chunks_removed: self.inner.chunks_removed.load(Ordering::Relaxed),
            records_kept: self.inner.records_kept.load(Ordering::Relaxed),
            records_discarded: self.inner.records_discarded.load(Ordering::Relaxed),
            space_saved: self.inner.space_saved.load(Ordering::Relaxed),
            index_entries_kept: self.inner.index_entries_kept.load(Ordering::Relaxed),
            index_entries_discarded: self.inner.index_entries_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_accumulated: u64,
    pub collisions: u64,
    pub streams_calculated: u64,
    pub chunks_scavenged: u64,
    pub chunks_skipped: u64,
    pub chunks_removed: u64,
    pub records_kept: u64,
    pub records_discarded: u64,
    pub space_saved: u64,
    pub index_entries_kept: u64,
    pub index_entries_discarded: u64,
}

/// Timer for measuring phase duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start new timer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer, log and return the duration
    pub fn stop(self) -> Duration {
        let duration = self.elapsed();
        tracing::debug!(
            name = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}
