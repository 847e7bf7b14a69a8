//! Transactional scavenge-state store.
//!
//! ```text
//! ┌──────────────┐  mutate   ┌─────────────┐  commit   ┌──────────┐
//! │  state port  │──────────>│ StateTables │──────────>│   WAL    │
//! └──────────────┘           └──────┬──────┘  (batch)  └──────────┘
//!                                   │ inverse
//!                                   ▼
//!                             undo log (rollback)
//! ```
//!
//! Without a WAL the store is purely in memory. Mutations made outside a
//! transaction are committed on their own.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use chunklog_core::{
    error::{Error, Result},
    state::*,
    CalculationStatus, ChunkExecutionInfo, ChunkTimeStampRange, DiscardPoint, IndexExecutionInfo,
    MetastreamData, OriginalStreamData, ScavengeCheckpoint, ScavengeConfig,
    StreamHandle, StreamHasher, StreamId, StreamMetadata,
};

use crate::collision::{CollisionDetector, CollisionOutcome};
use crate::tables::{StateMutation, StateTables};
use crate::wal::{StateWal, WalConfig, WalRecord};

struct Transaction {
    undo: Vec<StateMutation>,
    redo: Vec<StateMutation>,
}

struct Inner {
    tables: StateTables,
    detector: CollisionDetector,
    collision_hashes: HashSet<u64>,
    transaction: Option<Transaction>,
    wal: Option<StateWal>,
}

impl Inner {
    fn handle_for(&self, stream_id: &str) -> StreamHandle {
        if self.tables.collisions.contains(stream_id) {
            StreamHandle::Id(stream_id.to_string())
        } else {
            StreamHandle::Hash(self.detector.hash(stream_id))
        }
    }

    /// Apply inside the open transaction, or commit on its own.
    fn mutate(&mut self, mutation: StateMutation) -> Result<()> {
        if self.transaction.is_some() {
            let inverse = self.apply(&mutation);
            if let Some(tx) = self.transaction.as_mut() {
                tx.undo.push(inverse);
                tx.redo.push(mutation);
            }
            Ok(())
        } else {
            self.mutate_now(vec![mutation])
        }
    }

    /// Apply and persist immediately, bypassing any open transaction.
    fn mutate_now(&mut self, mutations: Vec<StateMutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let undo: Vec<StateMutation> = mutations.iter().map(|m| self.apply(m)).collect();
        if let Err(e) = self.persist(mutations) {
            self.undo(undo);
            return Err(e);
        }
        Ok(())
    }

    fn apply(&mut self, mutation: &StateMutation) -> StateMutation {
        if let StateMutation::Collision { stream_id, present: true } = mutation {
            let hash = self.detector.hash(stream_id);
            self.collision_hashes.insert(hash);
        }
        mutation.apply(&mut self.tables)
    }

    fn undo(&mut self, undo: Vec<StateMutation>) {
        for inverse in undo.into_iter().rev() {
            inverse.apply(&mut self.tables);
        }
        self.detector.clear_cache();
        self.rebuild_collision_hashes();
    }

    fn persist(&mut self, mutations: Vec<StateMutation>) -> Result<()> {
        match self.wal.as_mut() {
            Some(wal) => {
                wal.append(&WalRecord::Batch(mutations))?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn rebuild_collision_hashes(&mut self) {
        let hashes = self
            .tables
            .collisions
            .iter()
            .map(|id| self.detector.hash(id))
            .collect();
        self.collision_hashes = hashes;
    }

    fn original_stream(&self, handle: &StreamHandle) -> OriginalStreamData {
        self.tables
            .original_streams
            .get(handle)
            .cloned()
            .unwrap_or_default()
    }

    fn metastream(&self, handle: &StreamHandle) -> MetastreamData {
        self.tables.metastreams.get(handle).copied().unwrap_or_default()
    }

    fn chunk_weight_mutations_to_reset(&self, start: u32, end: u32) -> Vec<StateMutation> {
        self.tables
            .chunk_weights
            .range(start..=end)
            .map(|(chunk, _)| StateMutation::ChunkWeight { chunk: *chunk, weight: None })
            .collect()
    }
}

/// Scavenge state shared by every phase of a run.
#[derive(Clone)]
pub struct ScavengeStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl ScavengeStateStore {
    /// A store that lives only as long as the process.
    pub fn in_memory(hasher: Arc<dyn StreamHasher>, config: &ScavengeConfig) -> Self {
        Self::from_parts(StateTables::default(), hasher, config, None)
    }

    /// Open or create a durable store under `config.state.data_dir`.
    pub fn open(hasher: Arc<dyn StreamHasher>, config: &ScavengeConfig) -> Result<Self> {
        let wal_dir = config.state.data_dir.join("wal");
        let (mut wal, records) = StateWal::open(&wal_dir, WalConfig::from(&config.state))?;

        let mut tables = StateTables::default();
        let mut replayed = 0usize;
        for record in records {
            match record {
                WalRecord::Snapshot(snapshot) => tables = *snapshot,
                WalRecord::Batch(mutations) => {
                    for mutation in &mutations {
                        mutation.apply(&mut tables);
                    }
                }
            }
            replayed += 1;
        }

        if config.state.compact_on_open && replayed > 1 {
            wal.compact(&tables)?;
        }

        info!(
            "Opened scavenge state at {:?}: {} records replayed, checkpoint {}",
            config.state.data_dir,
            replayed,
            tables
                .checkpoint
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        Ok(Self::from_parts(tables, hasher, config, Some(wal)))
    }

    fn from_parts(
        tables: StateTables,
        hasher: Arc<dyn StreamHasher>,
        config: &ScavengeConfig,
        wal: Option<StateWal>,
    ) -> Self {
        let mut inner = Inner {
            tables,
            detector: CollisionDetector::new(hasher, config.hash_users_cache_capacity),
            collision_hashes: HashSet::new(),
            transaction: None,
            wal,
        };
        inner.rebuild_collision_hashes();
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Copy of the current tables, for inspection.
    pub fn snapshot(&self) -> StateTables {
        self.inner.lock().tables.clone()
    }

    pub fn original_stream_data(&self, stream_id: &str) -> Option<OriginalStreamData> {
        let inner = self.inner.lock();
        let handle = inner.handle_for(stream_id);
        inner.tables.original_streams.get(&handle).cloned()
    }

    pub fn metastream_data_of(&self, metastream_id: &str) -> Option<MetastreamData> {
        let inner = self.inner.lock();
        let handle = inner.handle_for(metastream_id);
        inner.tables.metastreams.get(&handle).copied()
    }

    pub fn chunk_weight(&self, logical_chunk_number: u32) -> f32 {
        self.inner
            .lock()
            .tables
            .chunk_weights
            .get(&logical_chunk_number)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_in_transaction(&self) -> bool {
        self.inner.lock().transaction.is_some()
    }
}

impl TransactionalState for ScavengeStateStore {
    fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.transaction.is_some() {
            return Err(Error::state("a transaction is already open"));
        }
        inner.transaction = Some(Transaction {
            undo: Vec::new(),
            redo: Vec::new(),
        });
        Ok(())
    }

    fn commit_transaction(&self, checkpoint: ScavengeCheckpoint) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut tx = inner
            .transaction
            .take()
            .ok_or_else(|| Error::state("commit without an open transaction"))?;

        let mutation = StateMutation::Checkpoint(Some(checkpoint));
        tx.undo.push(inner.apply(&mutation));
        tx.redo.push(mutation);

        if let Err(e) = inner.persist(tx.redo) {
            warn!("Scavenge state commit failed, rolling back: {}", e);
            inner.undo(tx.undo);
            return Err(e);
        }
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.transaction.take() {
            Some(tx) => {
                debug!("Rolling back {} scavenge state mutations", tx.undo.len());
                inner.undo(tx.undo);
            }
            None => debug!("Rollback without an open transaction"),
        }
        Ok(())
    }

    fn set_checkpoint(&self, checkpoint: ScavengeCheckpoint) -> Result<()> {
        self.inner
            .lock()
            .mutate_now(vec![StateMutation::Checkpoint(Some(checkpoint))])
    }
}

impl IncreaseChunkWeights for ScavengeStateStore {
    fn increase_chunk_weight(&self, logical_chunk_number: u32, extra_weight: f32) -> Result<()> {
        let mut inner = self.inner.lock();
        let current = inner
            .tables
            .chunk_weights
            .get(&logical_chunk_number)
            .copied()
            .unwrap_or(0.0);
        inner.mutate(StateMutation::ChunkWeight {
            chunk: logical_chunk_number,
            weight: Some(current + extra_weight),
        })
    }
}

impl ScavengeStateForAccumulator for ScavengeStateStore {
    fn detect_collisions(&self, stream_id: &str) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let (outcome, mutations) = inner.detector.detect(stream_id, &inner.tables);
        for mutation in mutations {
            inner.mutate(mutation)?;
        }
        if let CollisionOutcome::NewCollision { existing } = outcome {
            info!(
                "SCAVENGING: Found hash collision between \"{}\" and \"{}\"",
                stream_id, existing
            );
        }
        Ok(())
    }

    fn stream_handle(&self, stream_id: &str) -> StreamHandle {
        self.inner.lock().handle_for(stream_id)
    }

    fn set_metastream_discard_point(&self, metastream_id: &str, discard_point: DiscardPoint) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner.handle_for(metastream_id);
        let existing = inner.metastream(&handle);
        let updated = MetastreamData {
            discard_point: existing.discard_point.or(discard_point),
            ..existing
        };
        if inner.tables.metastreams.get(&handle) == Some(&updated) {
            return Ok(());
        }
        inner.mutate(StateMutation::Metastream { handle, data: Some(updated) })
    }

    fn set_metastream_tombstone(&self, metastream_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner.handle_for(metastream_id);
        let updated = MetastreamData {
            is_tombstoned: true,
            ..inner.metastream(&handle)
        };
        inner.mutate(StateMutation::Metastream { handle, data: Some(updated) })
    }

    fn set_original_stream_metadata(&self, original_stream_id: &str, metadata: &StreamMetadata) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner.handle_for(original_stream_id);
        let mut data = inner.original_stream(&handle);
        data.apply_metadata(metadata);
        inner.mutate(StateMutation::OriginalStream { handle, data: Some(data) })
    }

    fn set_original_stream_tombstone(&self, original_stream_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner.handle_for(original_stream_id);
        let mut data = inner.original_stream(&handle);
        data.apply_tombstone();
        inner.mutate(StateMutation::OriginalStream { handle, data: Some(data) })
    }

    fn set_chunk_time_stamp_range(&self, logical_chunk_number: u32, range: ChunkTimeStampRange) -> Result<()> {
        self.inner.lock().mutate(StateMutation::ChunkTimeStampRange {
            chunk: logical_chunk_number,
            range: Some(range),
        })
    }
}

impl ScavengeStateForCalculator for ScavengeStateStore {
    fn original_streams_to_calculate(
        &self,
        after: Option<&StreamHandle>,
        limit: usize,
    ) -> Result<Vec<(StreamHandle, OriginalStreamData)>> {
        let inner = self.inner.lock();
        Ok(inner
            .tables
            .original_streams
            .entries_after(after)
            .filter(|(_, data)| data.status == CalculationStatus::Active)
            .take(limit)
            .map(|(handle, data)| (handle, data.clone()))
            .collect())
    }

    fn set_original_stream_discard_points(
        &self,
        handle: &StreamHandle,
        status: CalculationStatus,
        discard_point: DiscardPoint,
        maybe_discard_point: DiscardPoint,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut data = inner
            .tables
            .original_streams
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::state(format!("no original stream data for {}", handle)))?;
        data.status = status;
        data.discard_point = discard_point;
        data.maybe_discard_point = maybe_discard_point;
        inner.mutate(StateMutation::OriginalStream {
            handle: handle.clone(),
            data: Some(data),
        })
    }

    fn chunk_time_stamp_range(&self, logical_chunk_number: u32) -> Option<ChunkTimeStampRange> {
        self.inner
            .lock()
            .tables
            .chunk_time_stamp_ranges
            .get(&logical_chunk_number)
            .copied()
    }
}

/// Chunk-executor slot view of the store.
struct WorkerState {
    inner: Arc<Mutex<Inner>>,
}

impl ChunkWorkerState for WorkerState {
    fn sum_chunk_weights(&self, start_logical_chunk: u32, end_logical_chunk: u32) -> f32 {
        self.inner
            .lock()
            .tables
            .chunk_weights
            .range(start_logical_chunk..=end_logical_chunk)
            .map(|(_, w)| *w)
            .sum()
    }

    fn reset_chunk_weights(&mut self, start_logical_chunk: u32, end_logical_chunk: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let mutations = inner.chunk_weight_mutations_to_reset(start_logical_chunk, end_logical_chunk);
        inner.mutate_now(mutations)
    }

    fn chunk_execution_info(&self, stream_id: &str) -> Option<ChunkExecutionInfo> {
        let inner = self.inner.lock();
        let handle = inner.handle_for(stream_id);
        inner
            .tables
            .original_streams
            .get(&handle)
            .map(OriginalStreamData::execution_info)
    }

    fn metastream_data(&self, metastream_id: &str) -> Option<MetastreamData> {
        let inner = self.inner.lock();
        let handle = inner.handle_for(metastream_id);
        inner.tables.metastreams.get(&handle).copied()
    }

    fn chunk_time_stamp_range(&self, logical_chunk_number: u32) -> Option<ChunkTimeStampRange> {
        self.inner
            .lock()
            .tables
            .chunk_time_stamp_ranges
            .get(&logical_chunk_number)
            .copied()
    }
}

impl ScavengeStateForChunkExecutor for ScavengeStateStore {
    fn borrow_state_for_worker(&self) -> Result<Box<dyn ChunkWorkerState>> {
        Ok(Box::new(WorkerState {
            inner: Arc::clone(&self.inner),
        }))
    }
}

impl ScavengeStateForChunkMerger for ScavengeStateStore {}

impl ScavengeStateForIndexExecutor for ScavengeStateStore {
    fn is_collision_hash(&self, hash: u64) -> bool {
        self.inner.lock().collision_hashes.contains(&hash)
    }

    fn index_execution_info(&self, handle: &StreamHandle) -> Option<IndexExecutionInfo> {
        let inner = self.inner.lock();
        if let Some(meta) = inner.tables.metastreams.get(handle) {
            return Some(IndexExecutionInfo {
                is_metastream: true,
                is_tombstoned: meta.is_tombstoned,
                discard_point: meta.discard_point,
            });
        }
        inner
            .tables
            .original_streams
            .get(handle)
            .map(|original| IndexExecutionInfo {
                is_metastream: false,
                is_tombstoned: original.is_tombstoned,
                discard_point: original.discard_point,
            })
    }
}

impl ScavengeStateForCleaner for ScavengeStateStore {
    fn all_chunks_executed(&self) -> bool {
        self.inner
            .lock()
            .tables
            .chunk_weights
            .values()
            .all(|w| *w <= 0.0)
    }

    fn delete_original_stream_data(&self, delete_archived: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let doomed: Vec<StreamHandle> = inner
            .tables
            .original_streams
            .entries_after(None)
            .filter(|(_, data)| match data.status {
                CalculationStatus::Spent => true,
                CalculationStatus::Archived => delete_archived,
                CalculationStatus::Active => false,
            })
            .map(|(handle, _)| handle)
            .collect();

        debug!("SCAVENGING: Deleting data of {} original streams", doomed.len());
        for handle in doomed {
            inner.mutate(StateMutation::OriginalStream { handle, data: None })?;
        }
        Ok(())
    }

    fn delete_metastream_data(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let handles = inner.tables.metastreams.handles();
        debug!("SCAVENGING: Deleting data of {} metadata streams", handles.len());
        for handle in handles {
            inner.mutate(StateMutation::Metastream { handle, data: None })?;
        }
        Ok(())
    }
}

impl ScavengeState for ScavengeStateStore {
    fn checkpoint(&self) -> Option<ScavengeCheckpoint> {
        self.inner.lock().tables.checkpoint.clone()
    }

    fn all_collisions(&self) -> Vec<StreamId> {
        self.inner.lock().tables.collisions.iter().cloned().collect()
    }

    fn log_stats(&self) {
        let inner = self.inner.lock();
        debug!(
            "SCAVENGING: State stats: {} hash users, {} collisions, {} original streams, {} metadata streams, {} chunk time stamp ranges, {} weighted chunks",
            inner.tables.hash_users.len(),
            inner.tables.collisions.len(),
            inner.tables.original_streams.len(),
            inner.tables.metastreams.len(),
            inner.tables.chunk_time_stamp_ranges.len(),
            inner.tables.chunk_weights.len(),
        );
    }
}
