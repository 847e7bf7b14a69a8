//! # Calculation
//!
//! Recomputes the discard points of every active original stream from its
//! index entries. Streams are processed in handle order, one transaction
//! per batch, checkpointed by the last handle of the batch.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use chunklog_core::{
    metrics::ScavengeMetrics,
    state::ScavengeStateForCalculator,
    traits::IndexReaderForCalculator,
    utils::rate_per_second,
    Cancellation, CalculationStatus, DiscardDecision, DiscardPoint, Error, OriginalStreamData,
    Result, ScavengeCheckpoint, ScavengeConfig, ScavengePoint, StreamHandle,
};

use crate::event_calculator::EventCalculator;
use crate::stream_calculator::StreamCalculator;
use crate::throttle::Throttle;
use crate::weights::WeightAccumulator;

pub struct Calculator {
    chunk_size: u64,
    batch_size: usize,
    page_size: usize,
    cancellation_check_period: usize,
    index_reader: Arc<dyn IndexReaderForCalculator>,
    throttle: Arc<Throttle>,
    metrics: ScavengeMetrics,
}

impl Calculator {
    pub fn new(
        config: &ScavengeConfig,
        index_reader: Arc<dyn IndexReaderForCalculator>,
        throttle: Arc<Throttle>,
        metrics: ScavengeMetrics,
    ) -> Self {
        Self {
            chunk_size: config.chunk_size,
            batch_size: config.calculator_batch_size.max(1),
            page_size: config.index_read_page_size.max(1),
            cancellation_check_period: config.cancellation_check_period.max(1),
            index_reader,
            throttle,
            metrics,
        }
    }

    /// Calculate every active stream after `done_stream_handle` and move on
    /// to the chunk execution checkpoint.
    pub async fn calculate<S>(
        &self,
        scavenge_point: &ScavengePoint,
        done_stream_handle: Option<StreamHandle>,
        state: &S,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        S: ScavengeStateForCalculator + ?Sized,
    {
        info!(
            "SCAVENGING: Calculating discard points for {} after {}",
            scavenge_point,
            done_stream_handle
                .as_ref()
                .map(|h| h.to_string())
                .unwrap_or_else(|| "start".to_string())
        );

        let started = Instant::now();
        let mut total = 0u64;
        let mut after = done_stream_handle;
        let mut checks = 0usize;

        loop {
            let batch = state.original_streams_to_calculate(after.as_ref(), self.batch_size)?;
            let Some((last_handle, _)) = batch.last() else { break };
            let last_handle = last_handle.clone();
            let count = batch.len() as u64;

            state.begin_transaction()?;
            if let Err(e) = self
                .calculate_batch(batch, scavenge_point, state, &mut checks, cancel)
                .await
            {
                if e.is_cancelled() {
                    info!("SCAVENGING: Calculation cancelled");
                } else {
                    error!("SCAVENGING: Calculation failed: {}", e);
                }
                state.rollback_transaction()?;
                return Err(e);
            }
            state.commit_transaction(ScavengeCheckpoint::Calculating {
                scavenge_point: scavenge_point.clone(),
                done_stream_handle: Some(last_handle.clone()),
            })?;

            total += count;
            self.metrics.record_streams_calculated(count);
            let elapsed = started.elapsed();
            info!(
                "SCAVENGING: Calculated {} streams so far in {:?} ({:.0} streams/s), last {}",
                total,
                elapsed,
                rate_per_second(total, elapsed),
                last_handle
            );

            after = Some(last_handle);
        }

        info!(
            "SCAVENGING: Calculated {} streams in total in {:?} including rests",
            total,
            started.elapsed()
        );
        self.throttle.rest(cancel).await?;

        state.set_checkpoint(ScavengeCheckpoint::ExecutingChunks {
            scavenge_point: scavenge_point.clone(),
            done_logical_chunk_number: None,
        })
    }

    async fn calculate_batch<S>(
        &self,
        batch: Vec<(StreamHandle, OriginalStreamData)>,
        scavenge_point: &ScavengePoint,
        state: &S,
        checks: &mut usize,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        S: ScavengeStateForCalculator + ?Sized,
    {
        let mut weights = WeightAccumulator::new(self.chunk_size);
        for (handle, data) in batch {
            cancel.check()?;
            self.calculate_stream(handle, data, scavenge_point, state, &mut weights, checks, cancel)
                .await?;
        }
        weights.flush(state)
    }

    async fn calculate_stream<S>(
        &self,
        handle: StreamHandle,
        data: OriginalStreamData,
        scavenge_point: &ScavengePoint,
        state: &S,
        weights: &mut WeightAccumulator,
        checks: &mut usize,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        S: ScavengeStateForCalculator + ?Sized,
    {
        if data.status != CalculationStatus::Active {
            return Err(Error::invariant(format!(
                "stream {} queued for calculation with status {:?}",
                handle, data.status
            )));
        }

        let stream = StreamCalculator::load(self.index_reader.as_ref(), handle, data, scavenge_point).await?;
        let status = stream.calculation_status();
        let (discard_point, maybe_discard_point) = self
            .calculate_discard_points(&stream, scavenge_point, state, weights, checks, cancel)
            .await?;

        // never move back relative to what an earlier run stored
        let stored = stream.data();
        let discard_point = stored.discard_point.or(discard_point);
        let maybe_discard_point = stored.maybe_discard_point.or(maybe_discard_point);

        if status != stored.status
            || discard_point != stored.discard_point
            || maybe_discard_point != stored.maybe_discard_point
        {
            debug!(
                "SCAVENGING: Stream {} is now {:?} with discard point {} and maybe discard point {}",
                stream.handle(),
                status,
                discard_point,
                maybe_discard_point
            );
            state.set_original_stream_discard_points(stream.handle(), status, discard_point, maybe_discard_point)?;
        }
        Ok(())
    }

    /// Walk the stream's events from the start until the first one to keep.
    ///
    /// `checks` counts events across streams and paces cancellation checks
    /// and rests.
    async fn calculate_discard_points<S>(
        &self,
        stream: &StreamCalculator,
        scavenge_point: &ScavengePoint,
        state: &S,
        weights: &mut WeightAccumulator,
        checks: &mut usize,
        cancel: &Cancellation,
    ) -> Result<(DiscardPoint, DiscardPoint)>
    where
        S: ScavengeStateForCalculator + ?Sized,
    {
        let events = EventCalculator::new(stream, scavenge_point, self.chunk_size);

        let mut discard_point = DiscardPoint::KEEP_ALL;
        let mut maybe_discard_point = DiscardPoint::KEEP_ALL;
        let mut first = true;
        let mut all_discarded_so_far = true;
        let mut from_event_number = 0;

        loop {
            let slice = self
                .index_reader
                .read_event_info_forward(stream.handle(), from_event_number, self.page_size, scavenge_point)
                .await?;

            for info in &slice.event_infos {
                *checks += 1;
                if *checks == self.cancellation_check_period {
                    *checks = 0;
                    cancel.check()?;
                    self.throttle.rest(cancel).await?;
                }

                if first {
                    discard_point = DiscardPoint::discard_before(info.event_number);
                    maybe_discard_point = discard_point;
                    first = false;
                }

                match events.decide(info, |chunk| state.chunk_time_stamp_range(chunk)) {
                    DiscardDecision::Discard => {
                        weights.on_discard(info.log_position);
                        discard_point = DiscardPoint::discard_including(info.event_number);
                        all_discarded_so_far = true;
                    }
                    DiscardDecision::MaybeDiscard => {
                        weights.on_maybe_discard(info.log_position);
                        maybe_discard_point = DiscardPoint::discard_including(info.event_number);
                        all_discarded_so_far = false;
                    }
                    DiscardDecision::AlreadyDiscarded => {
                        if all_discarded_so_far {
                            discard_point = DiscardPoint::discard_including(info.event_number);
                        }
                    }
                    DiscardDecision::Keep => {
                        return Ok((discard_point, maybe_discard_point.or(discard_point)));
                    }
                }
            }

            // slices may come back empty short of the end, e.g. when every
            // entry in range belongs to a colliding stream
            if slice.is_end_of_stream {
                if first {
                    return Ok((DiscardPoint::KEEP_ALL, DiscardPoint::KEEP_ALL));
                }
                return Err(Error::invariant(format!(
                    "every event of stream {} would be discarded",
                    stream.handle()
                )));
            }
            from_event_number = slice.next_event_number;
        }
    }
}
