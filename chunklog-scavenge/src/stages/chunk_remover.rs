//! # Chunk Removal
//!
//! Once a physical chunk falls outside both retention windows and the
//! archive confirms it holds the chunk's data, the local file is switched
//! out for remote locators instead of being rewritten.
//!
//! ```text
//!  log start                              scavenge point
//!  ├──────────────┬───────────────────────┬──────────────┤
//!  │  removable   │   retain_bytes window │
//!  └──────────────┴───────────────────────┘
//!        ▲ and the chunk's newest record is older than retain_period
//!        ▲ and archive checkpoint >= chunk end position
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use chunklog_core::{
    state::ChunkWorkerState,
    traits::{ArchiveCheckpoint, ChunkManagerForChunkRemover, ChunkReaderForExecutor, ScavengerLog},
    Cancellation, Error, Result, RetentionConfig, ScavengePoint, Timestamp,
};

#[async_trait]
pub trait ChunkRemover: Send + Sync {
    /// Remove `chunk` locally if retention allows it. Returns true when the
    /// chunk was removed and needs no execution.
    async fn start_removing_if_not_retained(
        &self,
        scavenge_point: &ScavengePoint,
        state: &dyn ChunkWorkerState,
        chunk: &dyn ChunkReaderForExecutor,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<bool>;
}

/// Remover used when no archive is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChunkRemover;

#[async_trait]
impl ChunkRemover for NoopChunkRemover {
    async fn start_removing_if_not_retained(
        &self,
        _scavenge_point: &ScavengePoint,
        _state: &dyn ChunkWorkerState,
        _chunk: &dyn ChunkReaderForExecutor,
        _log: &dyn ScavengerLog,
        _cancel: &Cancellation,
    ) -> Result<bool> {
        Ok(false)
    }
}

pub struct ChunkDeleter {
    retain_bytes: u64,
    retain_period: Duration,
    confirmation_retries: u32,
    confirmation_delay: Duration,
    archive_checkpoint: Arc<dyn ArchiveCheckpoint>,
    chunk_manager: Arc<dyn ChunkManagerForChunkRemover>,
}

impl ChunkDeleter {
    pub fn new(
        config: &RetentionConfig,
        archive_checkpoint: Arc<dyn ArchiveCheckpoint>,
        chunk_manager: Arc<dyn ChunkManagerForChunkRemover>,
    ) -> Self {
        Self {
            retain_bytes: config.retain_bytes,
            retain_period: config.retain_period,
            confirmation_retries: config.archive_confirmation_retries,
            confirmation_delay: config.archive_confirmation_delay,
            archive_checkpoint,
            chunk_manager,
        }
    }

    /// Inside the byte window ending at the scavenge point.
    pub fn is_retained_by_bytes(&self, scavenge_point: &ScavengePoint, chunk_end_position: u64) -> bool {
        chunk_end_position > scavenge_point.position.saturating_sub(self.retain_bytes)
    }

    /// Newest record is younger than the retention period. A chunk with no
    /// known time stamps is retained.
    pub fn is_retained_by_period(&self, scavenge_point: &ScavengePoint, newest: Option<Timestamp>) -> bool {
        let Some(newest) = newest else { return true };
        let cutoff = chrono::Duration::from_std(self.retain_period)
            .ok()
            .and_then(|period| scavenge_point.effective_now.checked_sub_signed(period))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        newest > cutoff
    }

    async fn is_confirmed_by_archive(&self, chunk_end_position: u64, cancel: &Cancellation) -> Result<bool> {
        for attempt in 0..=self.confirmation_retries {
            match self
                .archive_checkpoint
                .is_greater_than_or_equal_to(chunk_end_position)
                .await
            {
                Ok(true) => return Ok(true),
                Ok(false) => debug!(
                    "SCAVENGING: Archive has not reached {} yet (attempt {})",
                    chunk_end_position,
                    attempt + 1
                ),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(
                    "SCAVENGING: Could not read archive checkpoint (attempt {}): {}",
                    attempt + 1,
                    e
                ),
            }

            if attempt < self.confirmation_retries {
                tokio::select! {
                    _ = tokio::time::sleep(self.confirmation_delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }
        Ok(false)
    }
}

fn newest_time_stamp(state: &dyn ChunkWorkerState, start: u32, end: u32) -> Option<Timestamp> {
    (start..=end)
        .filter_map(|chunk| state.chunk_time_stamp_range(chunk))
        .map(|range| range.max)
        .max()
}

#[async_trait]
impl ChunkRemover for ChunkDeleter {
    async fn start_removing_if_not_retained(
        &self,
        scavenge_point: &ScavengePoint,
        state: &dyn ChunkWorkerState,
        chunk: &dyn ChunkReaderForExecutor,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<bool> {
        let start = chunk.chunk_start_number();
        let end = chunk.chunk_end_number();

        if self.is_retained_by_bytes(scavenge_point, chunk.chunk_end_position()) {
            debug!("SCAVENGING: Chunks {}-{} retained by size", start, end);
            return Ok(false);
        }
        if self.is_retained_by_period(scavenge_point, newest_time_stamp(state, start, end)) {
            debug!("SCAVENGING: Chunks {}-{} retained by period", start, end);
            return Ok(false);
        }
        if !self
            .is_confirmed_by_archive(chunk.chunk_end_position(), cancel)
            .await?
        {
            warn!(
                "SCAVENGING: Keeping chunks {}-{} locally: archive has not confirmed position {}",
                start,
                end,
                chunk.chunk_end_position()
            );
            return Ok(false);
        }

        let locators: Vec<String> = (start..=end).map(archived_chunk_locator).collect();
        if self.chunk_manager.switch_in_chunks(locators).await? {
            info!("SCAVENGING: Switched chunks {}-{} to the archive", start, end);
            log.chunk_removed(start, end);
            Ok(true)
        } else {
            warn!("SCAVENGING: Chunk manager refused to switch out chunks {}-{}", start, end);
            Ok(false)
        }
    }
}

pub fn archived_chunk_locator(logical_chunk_number: u32) -> String {
    format!("archived-chunk-{}", logical_chunk_number)
}
