//! Progress sink that reports through `tracing` and the run metrics.

use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chunklog_core::{
    metrics::ScavengeMetrics,
    traits::ScavengerLog,
    utils::{format_bytes, format_duration},
    ScavengeResult,
};

pub struct TracingScavengerLog {
    scavenge_id: String,
    metrics: ScavengeMetrics,
}

impl TracingScavengerLog {
    pub fn new(metrics: ScavengeMetrics) -> Self {
        Self {
            scavenge_id: Uuid::new_v4().to_string(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &ScavengeMetrics {
        &self.metrics
    }
}

impl ScavengerLog for TracingScavengerLog {
    fn scavenge_id(&self) -> &str {
        &self.scavenge_id
    }

    fn scavenge_started(&self) {
        info!("SCAVENGING: Scavenge {} started", self.scavenge_id);
    }

    fn chunks_scavenged(&self, start: u32, end: u32, elapsed: Duration, space_saved: i64, kept: u64, discarded: u64) {
        self.metrics.record_chunk_scavenged(kept, discarded, space_saved);
        info!(
            "SCAVENGING: Scavenged chunks {}-{} in {}: kept {} records, discarded {}, saved {}",
            start,
            end,
            format_duration(elapsed),
            kept,
            discarded,
            if space_saved >= 0 {
                format_bytes(space_saved as u64)
            } else {
                format!("-{}", format_bytes(space_saved.unsigned_abs()))
            }
        );
    }

    fn chunks_not_scavenged(&self, start: u32, end: u32, elapsed: Duration, error: &str) {
        warn!(
            "SCAVENGING: Chunks {}-{} not scavenged after {}: {}",
            start,
            end,
            format_duration(elapsed),
            error
        );
    }

    fn chunk_skipped(&self, start: u32, end: u32, weight: f32) {
        self.metrics.record_chunk_skipped();
        debug!("SCAVENGING: Skipped chunks {}-{} with weight {}", start, end, weight);
    }

    fn chunk_removed(&self, start: u32, end: u32) {
        self.metrics.record_chunk_removed();
        info!("SCAVENGING: Removed chunks {}-{} from local storage", start, end);
    }

    fn index_entry_processed(&self, kept: bool) {
        self.metrics.record_index_entry(kept);
    }

    fn scavenge_completed(&self, result: ScavengeResult, error: Option<&str>, elapsed: Duration) {
        match (result, error) {
            (ScavengeResult::Errored, Some(e)) => error!(
                "SCAVENGING: Scavenge {} errored after {}: {}",
                self.scavenge_id,
                format_duration(elapsed),
                e
            ),
            _ => info!(
                "SCAVENGING: Scavenge {} completed with {} after {}, space saved {}",
                self.scavenge_id,
                result,
                format_duration(elapsed),
                format_bytes(self.metrics.space_saved())
            ),
        }
    }

    fn space_saved(&self) -> u64 {
        self.metrics.space_saved()
    }
}
