//! # Scavenge State Ports
//!
//! The scavenge state is narrowed to one capability view per phase. Every
//! view is implemented by the same store; the phases only see what they
//! need.
//!
//! ```text
//!                    ┌───────────────────────────┐
//!                    │       ScavengeState       │
//!                    └─────────────┬─────────────┘
//!     ┌──────────┬─────────────┬───┴─────┬──────────────┬──────────┐
//!  Accumulator Calculator ChunkExecutor ChunkMerger IndexExecutor Cleaner
//!                              │
//!                   borrow_state_for_worker()
//!                              │
//!                      ChunkWorkerState (owned, one per slot)
//! ```
//!
//! Methods take `&self`; implementations use interior mutability.
//! Mutations made between `begin_transaction` and `commit_transaction` are
//! persisted atomically together with the checkpoint, or undone by
//! `rollback_transaction`.

use crate::checkpoint::ScavengeCheckpoint;
use crate::discard::DiscardPoint;
use crate::error::Result;
use crate::stream::{
    CalculationStatus, ChunkExecutionInfo, IndexExecutionInfo, MetastreamData, OriginalStreamData,
    StreamHandle,
};
use crate::types::{ChunkTimeStampRange, StreamId, StreamMetadata};

pub trait TransactionalState: Send + Sync {
    fn begin_transaction(&self) -> Result<()>;

    /// Persist the open transaction together with `checkpoint`.
    fn commit_transaction(&self, checkpoint: ScavengeCheckpoint) -> Result<()>;

    fn rollback_transaction(&self) -> Result<()>;

    /// Store a checkpoint outside of any transaction.
    fn set_checkpoint(&self, checkpoint: ScavengeCheckpoint) -> Result<()>;
}

pub trait IncreaseChunkWeights {
    fn increase_chunk_weight(&self, logical_chunk_number: u32, extra_weight: f32) -> Result<()>;
}

pub trait ScavengeStateForAccumulator: TransactionalState + IncreaseChunkWeights {
    /// Register `stream_id` with the collision detector.
    fn detect_collisions(&self, stream_id: &str) -> Result<()>;

    /// Handle for a stream already passed to `detect_collisions`.
    fn stream_handle(&self, stream_id: &str) -> StreamHandle;

    fn set_metastream_discard_point(&self, metastream_id: &str, discard_point: DiscardPoint) -> Result<()>;

    fn set_metastream_tombstone(&self, metastream_id: &str) -> Result<()>;

    fn set_original_stream_metadata(&self, original_stream_id: &str, metadata: &StreamMetadata) -> Result<()>;

    fn set_original_stream_tombstone(&self, original_stream_id: &str) -> Result<()>;

    fn set_chunk_time_stamp_range(&self, logical_chunk_number: u32, range: ChunkTimeStampRange) -> Result<()>;
}

pub trait ScavengeStateForCalculator: TransactionalState + IncreaseChunkWeights {
    /// Active original streams strictly after `after`, in handle order.
    fn original_streams_to_calculate(
        &self,
        after: Option<&StreamHandle>,
        limit: usize,
    ) -> Result<Vec<(StreamHandle, OriginalStreamData)>>;

    fn set_original_stream_discard_points(
        &self,
        handle: &StreamHandle,
        status: CalculationStatus,
        discard_point: DiscardPoint,
        maybe_discard_point: DiscardPoint,
    ) -> Result<()>;

    fn chunk_time_stamp_range(&self, logical_chunk_number: u32) -> Option<ChunkTimeStampRange>;
}

/// State owned by one chunk-executor slot. Chunk ranges of concurrent
/// workers never overlap, so weight resets need no transaction.
pub trait ChunkWorkerState: Send + Sync {
    fn sum_chunk_weights(&self, start_logical_chunk: u32, end_logical_chunk: u32) -> f32;

    fn reset_chunk_weights(&mut self, start_logical_chunk: u32, end_logical_chunk: u32) -> Result<()>;

    fn chunk_execution_info(&self, stream_id: &str) -> Option<ChunkExecutionInfo>;

    fn metastream_data(&self, metastream_id: &str) -> Option<MetastreamData>;

    fn chunk_time_stamp_range(&self, logical_chunk_number: u32) -> Option<ChunkTimeStampRange>;
}

pub trait ScavengeStateForChunkExecutor: TransactionalState {
    fn borrow_state_for_worker(&self) -> Result<Box<dyn ChunkWorkerState>>;
}

pub trait ScavengeStateForChunkMerger: TransactionalState {}

pub trait ScavengeStateForIndexExecutor: TransactionalState {
    fn is_collision_hash(&self, hash: u64) -> bool;

    fn index_execution_info(&self, handle: &StreamHandle) -> Option<IndexExecutionInfo>;
}

pub trait ScavengeStateForCleaner: TransactionalState {
    /// True when no logical chunk carries weight.
    fn all_chunks_executed(&self) -> bool;

    /// Forget spent streams, and archived ones too when `delete_archived`.
    fn delete_original_stream_data(&self, delete_archived: bool) -> Result<()>;

    fn delete_metastream_data(&self) -> Result<()>;
}

/// Everything the orchestrator needs.
pub trait ScavengeState:
    ScavengeStateForAccumulator
    + ScavengeStateForCalculator
    + ScavengeStateForChunkExecutor
    + ScavengeStateForChunkMerger
    + ScavengeStateForIndexExecutor
    + ScavengeStateForCleaner
{
    fn checkpoint(&self) -> Option<ScavengeCheckpoint>;

    fn all_collisions(&self) -> Vec<StreamId>;

    fn log_stats(&self);
}
