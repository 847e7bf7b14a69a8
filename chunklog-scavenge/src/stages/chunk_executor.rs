//! # Chunk Execution
//!
//! Rewrites the physical chunks below the scavenge point whose weight is
//! above the threshold, dropping the records the discard points allow.
//! Physical chunks are processed by up to `threads` workers; the
//! checkpoint trails the last chunk of the completed prefix.
//!
//! ```text
//!  physical chunk ──► remote?            ──► skip
//!                 ──► removed by retention ──► reset weights
//!                 ──► weight > threshold ──► rewrite ──► reset weights
//!                 ──► otherwise          ──► skip
//! ```

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use chunklog_core::{
    state::{ChunkWorkerState, ScavengeStateForChunkExecutor},
    traits::{ChunkManagerForChunkExecutor, ChunkReaderForExecutor, ScavengerLog},
    types::{PrepareRecord, RecordForExecutor},
    Cancellation, ChunkExecutionInfo, DiscardPoint, Error, MetastreamLookup, Result,
    ScavengeCheckpoint, ScavengeConfig, ScavengePoint,
};

use crate::parallel::run_with_trailing_checkpoint;
use crate::stages::chunk_remover::ChunkRemover;
use crate::stream_calculator::max_age_cutoff;
use crate::throttle::Throttle;

pub struct ChunkExecutor {
    chunk_size: u64,
    threads: usize,
    chunk_manager: Arc<dyn ChunkManagerForChunkExecutor>,
    worker: Arc<ChunkExecutionWorker>,
}

/// Per-chunk work shared by every slot.
pub struct ChunkExecutionWorker {
    threads: usize,
    unsafe_ignore_hard_deletes: bool,
    cancellation_check_period: usize,
    chunk_manager: Arc<dyn ChunkManagerForChunkExecutor>,
    chunk_remover: Arc<dyn ChunkRemover>,
    lookup: Arc<dyn MetastreamLookup>,
    throttle: Arc<Throttle>,
}

impl ChunkExecutor {
    pub fn new(
        config: &ScavengeConfig,
        chunk_manager: Arc<dyn ChunkManagerForChunkExecutor>,
        chunk_remover: Arc<dyn ChunkRemover>,
        lookup: Arc<dyn MetastreamLookup>,
        throttle: Arc<Throttle>,
    ) -> Self {
        let threads = config.effective_threads();
        Self {
            chunk_size: config.chunk_size,
            threads,
            chunk_manager: Arc::clone(&chunk_manager),
            worker: Arc::new(ChunkExecutionWorker {
                threads,
                unsafe_ignore_hard_deletes: config.unsafe_ignore_hard_deletes,
                cancellation_check_period: config.cancellation_check_period.max(1),
                chunk_manager,
                chunk_remover,
                lookup,
                throttle,
            }),
        }
    }

    /// Execute the physical chunks after `done_logical_chunk_number` and
    /// move on to the merge checkpoint.
    pub async fn execute<S>(
        &self,
        scavenge_point: &ScavengePoint,
        done_logical_chunk_number: Option<u32>,
        state: &S,
        log: Arc<dyn ScavengerLog>,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        S: ScavengeStateForChunkExecutor + ?Sized,
    {
        let start_chunk = done_logical_chunk_number.map(|n| n + 1).unwrap_or(0);
        info!(
            "SCAVENGING: Executing chunks from logical chunk {} with {} thread(s) for {}",
            start_chunk, self.threads, scavenge_point
        );

        let slots = (0..self.threads)
            .map(|_| state.borrow_state_for_worker())
            .collect::<Result<Vec<_>>>()?;

        let chunks = PhysicalChunks {
            chunk_manager: self.chunk_manager.as_ref(),
            position: u64::from(start_chunk) * self.chunk_size,
            up_to: scavenge_point.position,
            failed: false,
        };

        let worker = Arc::clone(&self.worker);
        let sp = scavenge_point.clone();
        let worker_cancel = cancel.clone();

        run_with_trailing_checkpoint(
            chunks,
            slots,
            |chunk: &Arc<dyn ChunkReaderForExecutor>| chunk.chunk_end_number(),
            move |mut slot: Box<dyn ChunkWorkerState>, chunk: Arc<dyn ChunkReaderForExecutor>| {
                let worker = Arc::clone(&worker);
                let sp = sp.clone();
                let log = Arc::clone(&log);
                let cancel = worker_cancel.clone();
                async move {
                    let result = worker
                        .execute_physical_chunk(slot.as_mut(), chunk.as_ref(), &sp, log.as_ref(), &cancel)
                        .await;
                    (slot, result)
                }
            },
            |done| {
                state.set_checkpoint(ScavengeCheckpoint::ExecutingChunks {
                    scavenge_point: scavenge_point.clone(),
                    done_logical_chunk_number: Some(done),
                })
            },
            cancel,
        )
        .await?;

        state.set_checkpoint(ScavengeCheckpoint::MergingChunks {
            scavenge_point: scavenge_point.clone(),
        })
    }
}

/// Physical chunks from a position up to the scavenge point.
struct PhysicalChunks<'a> {
    chunk_manager: &'a dyn ChunkManagerForChunkExecutor,
    position: u64,
    up_to: u64,
    failed: bool,
}

impl Iterator for PhysicalChunks<'_> {
    type Item = Result<Arc<dyn ChunkReaderForExecutor>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.up_to {
            return None;
        }

        let chunk = match self.chunk_manager.get_chunk_reader_for(self.position) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        if !chunk.is_read_only() {
            self.failed = true;
            return Some(Err(Error::invariant(format!(
                "reached open chunk {} before scavenge point at {}",
                chunk.chunk_start_number(),
                self.up_to
            ))));
        }
        if chunk.chunk_end_position() <= self.position {
            self.failed = true;
            return Some(Err(Error::invariant(format!(
                "chunk {} ends at {} which does not advance past {}",
                chunk.name(),
                chunk.chunk_end_position(),
                self.position
            ))));
        }

        self.position = chunk.chunk_end_position();
        Some(Ok(chunk))
    }
}

impl ChunkExecutionWorker {
    async fn execute_physical_chunk(
        &self,
        state: &mut dyn ChunkWorkerState,
        chunk: &dyn ChunkReaderForExecutor,
        scavenge_point: &ScavengePoint,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()> {
        let start = chunk.chunk_start_number();
        let end = chunk.chunk_end_number();
        let weight = state.sum_chunk_weights(start, end);

        if chunk.is_remote() {
            // the archive tier owns remote chunks
            debug!(
                "SCAVENGING: Skipped physical chunk {} with weight {} because it is remote",
                chunk.name(),
                weight
            );
        } else if self
            .chunk_remover
            .start_removing_if_not_retained(scavenge_point, &*state, chunk, log, cancel)
            .await?
        {
            state.reset_chunk_weights(start, end)?;
        } else if weight > scavenge_point.threshold as f32 || self.unsafe_ignore_hard_deletes {
            self.scavenge_chunk(weight, &*state, chunk, scavenge_point, log, cancel)
                .await?;
            state.reset_chunk_weights(start, end)?;
        } else {
            debug!(
                "SCAVENGING: Skipped physical chunk {} with weight {}. The threshold is {}",
                chunk.name(),
                weight,
                scavenge_point.threshold
            );
            log.chunk_skipped(start, end, weight);
        }

        cancel.check()?;
        if self.threads == 1 {
            self.throttle.rest(cancel).await?;
        }
        Ok(())
    }

    async fn scavenge_chunk(
        &self,
        weight: f32,
        state: &dyn ChunkWorkerState,
        chunk: &dyn ChunkReaderForExecutor,
        scavenge_point: &ScavengePoint,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()> {
        let started = Instant::now();
        let start = chunk.chunk_start_number();
        let end = chunk.chunk_end_number();

        debug!(
            "SCAVENGING: Started to scavenge physical chunk {} with weight {}. {} => {} ({} => {})",
            chunk.name(),
            weight,
            start,
            end,
            chunk.chunk_start_position(),
            chunk.chunk_end_position()
        );

        let mut output = match self.chunk_manager.create_chunk_writer(chunk).await {
            Ok(output) => output,
            Err(e) => {
                error!(
                    "SCAVENGING: Could not create output chunk for {}, stopping: {}",
                    chunk.name(),
                    e
                );
                return Err(e);
            }
        };
        debug!("SCAVENGING: Resulting temp chunk file: {}", output.local_file_name());

        let mut kept = 0u64;
        let mut discarded = 0u64;

        let copied: Result<(String, u64)> = async {
            let mut records = chunk.read_records().await?;
            let mut traversed = 0usize;

            while let Some(record) = records.next_record().await? {
                let keep = match &record {
                    RecordForExecutor::Prepare(prepare) => !self.should_discard(state, scavenge_point, prepare),
                    RecordForExecutor::NonPrepare(_) => true,
                };
                if keep {
                    kept += 1;
                    output.write_record(&record).await?;
                } else {
                    discarded += 1;
                }

                traversed += 1;
                if traversed % self.cancellation_check_period == 0 {
                    cancel.check()?;
                }
            }

            debug!(
                "SCAVENGING: Scavenging {} traversed {} records. Kept {}. Discarded {}",
                chunk.name(),
                kept + discarded,
                kept,
                discarded
            );
            output.complete().await
        }
        .await;

        match copied {
            Ok((new_file_name, new_file_size)) => {
                let elapsed = started.elapsed();
                debug!(
                    "SCAVENGING: Scavenged {} into {} ({} bytes => {} bytes)",
                    chunk.name(),
                    new_file_name,
                    chunk.file_size(),
                    new_file_size
                );
                let space_saved = chunk.file_size() as i64 - new_file_size as i64;
                log.chunks_scavenged(start, end, elapsed, space_saved, kept, discarded);
                Ok(())
            }
            Err(Error::Cancelled) => {
                info!("SCAVENGING: Cancelled at {}", chunk.name());
                output.abort(false);
                Err(Error::Cancelled)
            }
            Err(e @ Error::FileBeingDeleted { .. }) => {
                info!(
                    "SCAVENGING: {} while scavenging, chunks were probably re-replicated. Removing {}",
                    e,
                    output.local_file_name()
                );
                output.abort(true);
                Err(e)
            }
            Err(e) => {
                info!("SCAVENGING: Error while scavenging chunks {}-{}: {}", start, end, e);
                output.abort(true);
                log.chunks_not_scavenged(start, end, started.elapsed(), &e.to_string());
                Err(e)
            }
        }
    }

    pub fn should_discard(
        &self,
        state: &dyn ChunkWorkerState,
        scavenge_point: &ScavengePoint,
        record: &PrepareRecord,
    ) -> bool {
        if record.log_position >= scavenge_point.position {
            return false;
        }

        let is_metastream = self.lookup.is_metastream(&record.stream_id);
        let details = if is_metastream {
            let data = state.metastream_data(&record.stream_id).unwrap_or_default();
            ChunkExecutionInfo {
                is_tombstoned: data.is_tombstoned,
                discard_point: data.discard_point,
                maybe_discard_point: DiscardPoint::KEEP_ALL,
                max_age: None,
            }
        } else {
            match state.chunk_execution_info(&record.stream_id) {
                Some(details) => details,
                None => return false,
            }
        };

        if !record.is_self_committed {
            // part of an explicit transaction
            if !details.is_tombstoned {
                return false;
            }
            if self.unsafe_ignore_hard_deletes {
                return true;
            }
            return !(record.is_tombstone || record.is_transaction_begin);
        }

        if details.is_tombstoned {
            if self.unsafe_ignore_hard_deletes {
                info!(
                    "SCAVENGING: Removing hard deleted stream tombstone for stream {} at position {}",
                    record.stream_id, record.log_position
                );
                return true;
            }
            if is_metastream {
                return true;
            }
        }

        if details.discard_point.should_discard(record.event_number) {
            return true;
        }
        if !details.maybe_discard_point.should_discard(record.event_number) {
            return false;
        }

        match details.max_age {
            Some(max_age) => record.time_stamp < max_age_cutoff(scavenge_point.effective_now, max_age),
            None => false,
        }
    }
}
