//! # Accumulation
//!
//! Single pass over the log up to the scavenge point, one transaction per
//! logical chunk. Registers every stream id with the collision detector,
//! records metadata and tombstones against their streams, and captures
//! per-chunk time-stamp ranges and weights.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use chunklog_core::{
    metrics::ScavengeMetrics,
    state::ScavengeStateForAccumulator,
    traits::{ChunkReaderForAccumulator, IndexReaderForAccumulator},
    types::{AccumulatorRecordType, MetadataStreamRecord, OriginalStreamRecord, TombstoneRecord},
    utils::rate_per_second,
    Cancellation, ChunkTimeStampRange, DiscardPoint, Error, MetastreamLookup, Result,
    ScavengeCheckpoint, ScavengeConfig, ScavengePoint, Timestamp,
};

use crate::throttle::Throttle;
use crate::weights::WeightAccumulator;

pub struct Accumulator {
    chunk_size: u64,
    metadata_ordering_window: usize,
    cancellation_check_period: usize,
    chunk_reader: Arc<dyn ChunkReaderForAccumulator>,
    index_reader: Arc<dyn IndexReaderForAccumulator>,
    lookup: Arc<dyn MetastreamLookup>,
    throttle: Arc<Throttle>,
    metrics: ScavengeMetrics,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    records: u64,
    reached_scavenge_point: bool,
}

impl Accumulator {
    pub fn new(
        config: &ScavengeConfig,
        chunk_reader: Arc<dyn ChunkReaderForAccumulator>,
        index_reader: Arc<dyn IndexReaderForAccumulator>,
        lookup: Arc<dyn MetastreamLookup>,
        throttle: Arc<Throttle>,
        metrics: ScavengeMetrics,
    ) -> Self {
        Self {
            chunk_size: config.chunk_size,
            metadata_ordering_window: config.metadata_ordering_window,
            cancellation_check_period: config.cancellation_check_period.max(1),
            chunk_reader,
            index_reader,
            lookup,
            throttle,
            metrics,
        }
    }

    /// Accumulate the chunks after `done_logical_chunk_number` and move on
    /// to the calculation checkpoint.
    pub async fn accumulate<S>(
        &self,
        scavenge_point: &ScavengePoint,
        done_logical_chunk_number: Option<u32>,
        state: &S,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        S: ScavengeStateForAccumulator + ?Sized,
    {
        let mut chunk = done_logical_chunk_number.map(|n| n + 1).unwrap_or(0);
        info!(
            "SCAVENGING: Accumulating from logical chunk {} up to {}",
            chunk, scavenge_point
        );

        loop {
            if u64::from(chunk) * self.chunk_size > scavenge_point.position {
                break;
            }
            let outcome = self
                .accumulate_chunk_transactionally(chunk, scavenge_point, state, cancel)
                .await?;
            if outcome.reached_scavenge_point {
                break;
            }
            chunk += 1;
        }

        state.set_checkpoint(ScavengeCheckpoint::Calculating {
            scavenge_point: scavenge_point.clone(),
            done_stream_handle: None,
        })
    }

    async fn accumulate_chunk_transactionally<S>(
        &self,
        chunk: u32,
        scavenge_point: &ScavengePoint,
        state: &S,
        cancel: &Cancellation,
    ) -> Result<ChunkOutcome>
    where
        S: ScavengeStateForAccumulator + ?Sized,
    {
        let started = Instant::now();
        state.begin_transaction()?;

        let result = self.accumulate_chunk(chunk, scavenge_point, state, cancel).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_cancelled() {
                    info!("SCAVENGING: Accumulation of chunk {} cancelled", chunk);
                } else {
                    error!("SCAVENGING: Accumulation of chunk {} failed: {}", chunk, e);
                }
                state.rollback_transaction()?;
                return Err(e);
            }
        };

        state.commit_transaction(ScavengeCheckpoint::Accumulating {
            scavenge_point: scavenge_point.clone(),
            done_logical_chunk_number: Some(chunk),
        })?;

        let elapsed = started.elapsed();
        self.metrics.record_accumulated(outcome.records);
        info!(
            "SCAVENGING: Accumulated {} records in chunk {} in {:?} ({:.0} records/s)",
            outcome.records,
            chunk,
            elapsed,
            rate_per_second(outcome.records, elapsed)
        );
        Ok(outcome)
    }

    async fn accumulate_chunk<S>(
        &self,
        chunk: u32,
        scavenge_point: &ScavengePoint,
        state: &S,
        cancel: &Cancellation,
    ) -> Result<ChunkOutcome>
    where
        S: ScavengeStateForAccumulator + ?Sized,
    {
        let mut cursor = self.chunk_reader.read_chunk(chunk).await?;
        let mut weights = WeightAccumulator::new(self.chunk_size);
        let mut time_stamps = ChunkTimeStampRange::empty();
        let mut outcome = ChunkOutcome::default();

        let mut original = OriginalStreamRecord::default();
        let mut metadata = MetadataStreamRecord::default();
        let mut tombstone = TombstoneRecord::default();

        while let Some(kind) = cursor
            .next_into(&mut original, &mut metadata, &mut tombstone)
            .await?
        {
            let (log_position, time_stamp) = position_and_time(kind, &original, &metadata, &tombstone);

            if log_position > scavenge_point.position {
                return Err(Error::invariant(format!(
                    "record at {} in chunk {} is past the scavenge point at {}",
                    log_position, chunk, scavenge_point.position
                )));
            }

            match kind {
                AccumulatorRecordType::OriginalStream => {
                    state.detect_collisions(&original.stream_id)?;
                }
                AccumulatorRecordType::MetadataStream => {
                    self.process_metadata(&metadata, scavenge_point, state, &mut weights)
                        .await?;
                }
                AccumulatorRecordType::Tombstone => {
                    self.process_tombstone(&tombstone, scavenge_point, state, &mut weights)
                        .await?;
                }
            }

            time_stamps.include(time_stamp);
            outcome.records += 1;

            if log_position == scavenge_point.position {
                outcome.reached_scavenge_point = true;
                break;
            }

            if outcome.records % self.cancellation_check_period as u64 == 0 {
                cancel.check()?;
                self.throttle.rest(cancel).await?;
            }
        }

        if !time_stamps.is_empty() {
            state.set_chunk_time_stamp_range(chunk, time_stamps)?;
        }
        weights.flush(state)?;
        Ok(outcome)
    }

    async fn process_metadata<S>(
        &self,
        record: &MetadataStreamRecord,
        scavenge_point: &ScavengePoint,
        state: &S,
        weights: &mut WeightAccumulator,
    ) -> Result<()>
    where
        S: ScavengeStateForAccumulator + ?Sized,
    {
        let original_stream_id = self.lookup.original_stream_of(&record.stream_id);
        state.detect_collisions(&original_stream_id)?;
        state.detect_collisions(&record.stream_id)?;

        if record.event_number < 0 {
            return Err(Error::invariant(format!(
                "metadata record in {} at {} has negative event number {}",
                record.stream_id, record.log_position, record.event_number
            )));
        }

        // Look at the neighbourhood of this record to tell whether it is
        // the newest metadata or a stale write that landed out of order.
        let handle = state.stream_handle(&record.stream_id);
        let from = if record.event_number == 0 { 0 } else { record.event_number - 1 };
        let result = self
            .index_reader
            .read_event_info_forward(&handle, from, self.metadata_ordering_window, scavenge_point)
            .await?;

        let out_of_order = result.event_infos.iter().any(|info| {
            info.log_position < record.log_position && info.event_number >= record.event_number
        });

        if out_of_order {
            weights.on_discard(record.log_position);
            info!(
                "SCAVENGING: Ignoring out of order metadata record {}@{} at position {}",
                record.event_number, record.stream_id, record.log_position
            );
            return Ok(());
        }

        if let Some(previous) = result.event_infos.first() {
            if previous.event_number < record.event_number && previous.log_position < record.log_position {
                weights.on_discard(previous.log_position);
            }
        }

        if self.lookup.is_metastream(&original_stream_id) {
            debug!(
                "SCAVENGING: Ignoring metadata of metadata stream {}",
                record.stream_id
            );
        } else {
            state.set_original_stream_metadata(&original_stream_id, &record.metadata)?;
        }

        let discard_point = DiscardPoint::discard_before(record.event_number);
        if !discard_point.is_keep_all() {
            state.set_metastream_discard_point(&record.stream_id, discard_point)?;
        }
        Ok(())
    }

    async fn process_tombstone<S>(
        &self,
        record: &TombstoneRecord,
        scavenge_point: &ScavengePoint,
        state: &S,
        weights: &mut WeightAccumulator,
    ) -> Result<()>
    where
        S: ScavengeStateForAccumulator + ?Sized,
    {
        state.detect_collisions(&record.stream_id)?;

        if self.lookup.is_metastream(&record.stream_id) {
            return Err(Error::invariant(format!(
                "tombstone in metadata stream {} at {}",
                record.stream_id, record.log_position
            )));
        }
        if record.event_number < 0 {
            return Err(Error::invariant(format!(
                "tombstone in {} at {} has negative event number {}",
                record.stream_id, record.log_position, record.event_number
            )));
        }

        state.set_original_stream_tombstone(&record.stream_id)?;

        let metastream_id = self.lookup.metastream_of(&record.stream_id);
        state.detect_collisions(&metastream_id)?;
        state.set_metastream_tombstone(&metastream_id)?;

        // the last metadata record is superseded by the tombstone
        let handle = state.stream_handle(&metastream_id);
        let result = self
            .index_reader
            .read_event_info_backward(&handle, None, 1, scavenge_point)
            .await?;
        for info in &result.event_infos {
            weights.on_discard(info.log_position);
        }
        Ok(())
    }
}

fn position_and_time(
    kind: AccumulatorRecordType,
    original: &OriginalStreamRecord,
    metadata: &MetadataStreamRecord,
    tombstone: &TombstoneRecord,
) -> (u64, Timestamp) {
    match kind {
        AccumulatorRecordType::OriginalStream => (original.log_position, original.time_stamp),
        AccumulatorRecordType::MetadataStream => (metadata.log_position, metadata.time_stamp),
        AccumulatorRecordType::Tombstone => (tombstone.log_position, tombstone.time_stamp),
    }
}
