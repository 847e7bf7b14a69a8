//! # Collaborator Traits
//!
//! Interfaces the scavenger consumes from the log, the index, the chunk
//! manager and the archive tier.
//!
//! 1. **Async-First**: reads that can hit disk or the network are async
//! 2. **Error Propagation**: all operations return Result
//! 3. **Buffer Reuse**: accumulator reads fill caller-owned records

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::Cancellation;
use crate::stream::StreamHandle;
use crate::types::{
    AccumulatorRecordType, IndexEntry, IndexReadEventInfoResult, MetadataStreamRecord,
    OriginalStreamRecord, RecordForExecutor, ScavengePoint, ScavengeResult, StreamId,
    TombstoneRecord,
};
use crate::Result;

// ============================================================================
// Accumulator
// ============================================================================

/// Cursor over the records of one logical chunk.
#[async_trait]
pub trait AccumulatorChunkCursor: Send {
    /// Fill the buffer matching the next record's kind and return that kind.
    async fn next_into(
        &mut self,
        original: &mut OriginalStreamRecord,
        metadata: &mut MetadataStreamRecord,
        tombstone: &mut TombstoneRecord,
    ) -> Result<Option<AccumulatorRecordType>>;
}

#[async_trait]
pub trait ChunkReaderForAccumulator: Send + Sync {
    async fn read_chunk(&self, logical_chunk_number: u32) -> Result<Box<dyn AccumulatorChunkCursor>>;
}

#[async_trait]
pub trait IndexReaderForAccumulator: Send + Sync {
    async fn read_event_info_forward(
        &self,
        handle: &StreamHandle,
        from_event_number: i64,
        max_count: usize,
        scavenge_point: &ScavengePoint,
    ) -> Result<IndexReadEventInfoResult>;

    /// `from_event_number` of `None` reads from the last event.
    async fn read_event_info_backward(
        &self,
        handle: &StreamHandle,
        from_event_number: Option<i64>,
        max_count: usize,
        scavenge_point: &ScavengePoint,
    ) -> Result<IndexReadEventInfoResult>;
}

// ============================================================================
// Calculator
// ============================================================================

#[async_trait]
pub trait IndexReaderForCalculator: Send + Sync {
    /// Last event number of the stream before the scavenge point.
    async fn last_event_number(
        &self,
        handle: &StreamHandle,
        scavenge_point: &ScavengePoint,
    ) -> Result<Option<i64>>;

    async fn read_event_info_forward(
        &self,
        handle: &StreamHandle,
        from_event_number: i64,
        max_count: usize,
        scavenge_point: &ScavengePoint,
    ) -> Result<IndexReadEventInfoResult>;
}

// ============================================================================
// Chunk executor
// ============================================================================

#[async_trait]
pub trait ExecutorRecordCursor: Send {
    async fn next_record(&mut self) -> Result<Option<RecordForExecutor>>;
}

/// A physical chunk, possibly spanning several logical chunks.
#[async_trait]
pub trait ChunkReaderForExecutor: Send + Sync {
    fn name(&self) -> &str;
    fn file_size(&self) -> u64;
    fn is_read_only(&self) -> bool;
    fn is_remote(&self) -> bool;
    fn chunk_start_number(&self) -> u32;
    fn chunk_end_number(&self) -> u32;
    fn chunk_start_position(&self) -> u64;
    fn chunk_end_position(&self) -> u64;

    async fn read_records(&self) -> Result<Box<dyn ExecutorRecordCursor>>;
}

#[async_trait]
pub trait ChunkWriterForExecutor: Send {
    fn local_file_name(&self) -> &str;

    async fn write_record(&mut self, record: &RecordForExecutor) -> Result<()>;

    /// Switch the new file in place of the source. Returns its name and size.
    async fn complete(&mut self) -> Result<(String, u64)>;

    /// Drop the output. Without `delete_immediately` the temp file is kept for inspection.
    fn abort(&mut self, delete_immediately: bool);
}

#[async_trait]
pub trait ChunkManagerForChunkExecutor: Send + Sync {
    fn get_chunk_reader_for(&self, position: u64) -> Result<Arc<dyn ChunkReaderForExecutor>>;

    async fn create_chunk_writer(
        &self,
        source: &dyn ChunkReaderForExecutor,
    ) -> Result<Box<dyn ChunkWriterForExecutor>>;
}

// ============================================================================
// Chunk merger
// ============================================================================

#[async_trait]
pub trait ChunkMergerBackend: Send + Sync {
    async fn merge_chunks(
        &self,
        scavenge_point: &ScavengePoint,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()>;
}

// ============================================================================
// Index executor
// ============================================================================

pub type ShouldKeep<'a> = dyn FnMut(&IndexEntry) -> Result<bool> + Send + 'a;

#[async_trait]
pub trait IndexScavenger: Send + Sync {
    /// Rewrite the index up to `up_to_position`, keeping entries for which
    /// `should_keep` returns true.
    async fn scavenge_index(
        &self,
        up_to_position: u64,
        should_keep: &mut ShouldKeep<'_>,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()>;
}

pub trait ChunkReaderForIndexExecutor: Send + Sync {
    /// Stream of the record at `position`, if a record is still there.
    fn try_get_stream_id(&self, position: u64) -> Result<Option<StreamId>>;
}

// ============================================================================
// Chunk removal
// ============================================================================

#[async_trait]
pub trait ArchiveCheckpoint: Send + Sync {
    async fn is_greater_than_or_equal_to(&self, position: u64) -> Result<bool>;
}

#[async_trait]
pub trait ChunkManagerForChunkRemover: Send + Sync {
    async fn switch_in_chunks(&self, locators: Vec<String>) -> Result<bool>;
}

// ============================================================================
// Orchestration
// ============================================================================

#[async_trait]
pub trait ScavengePointSource: Send + Sync {
    async fn latest_scavenge_point(&self) -> Result<Option<ScavengePoint>>;

    /// `expected_version` of `None` means the scavenge point stream must not exist yet.
    async fn add_scavenge_point(&self, expected_version: Option<i64>, threshold: i32) -> Result<ScavengePoint>;
}

/// Progress sink for one scavenge run.
pub trait ScavengerLog: Send + Sync {
    fn scavenge_id(&self) -> &str;

    fn scavenge_started(&self);

    fn chunks_scavenged(&self, start: u32, end: u32, elapsed: Duration, space_saved: i64, kept: u64, discarded: u64);

    fn chunks_not_scavenged(&self, start: u32, end: u32, elapsed: Duration, error: &str);

    fn chunk_skipped(&self, start: u32, end: u32, weight: f32);

    fn chunk_removed(&self, start: u32, end: u32);

    fn index_entry_processed(&self, kept: bool);

    fn scavenge_completed(&self, result: ScavengeResult, error: Option<&str>, elapsed: Duration);

    fn space_saved(&self) -> u64;
}
