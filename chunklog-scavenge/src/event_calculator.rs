//! Keep/discard decision for a single event during calculation.

use chunklog_core::{
    logical_chunk_number, types::EventInfo, ChunkTimeStampRange, DiscardDecision, ScavengePoint,
};

use crate::stream_calculator::StreamCalculator;

pub struct EventCalculator<'a> {
    stream: &'a StreamCalculator,
    scavenge_point: &'a ScavengePoint,
    chunk_size: u64,
}

impl<'a> EventCalculator<'a> {
    pub fn new(stream: &'a StreamCalculator, scavenge_point: &'a ScavengePoint, chunk_size: u64) -> Self {
        Self {
            stream,
            scavenge_point,
            chunk_size,
        }
    }

    /// Decide the fate of one event. `chunk_range` looks up the time-stamp
    /// range of a logical chunk and is only consulted for max-age streams.
    pub fn decide<F>(&self, event: &EventInfo, chunk_range: F) -> DiscardDecision
    where
        F: FnOnce(u32) -> Option<ChunkTimeStampRange>,
    {
        if event.log_position >= self.scavenge_point.position {
            return DiscardDecision::Keep;
        }

        // the last event of a stream is never discarded
        match self.stream.last_event_number() {
            Some(last) if event.event_number < last => {}
            _ => return DiscardDecision::Keep,
        }

        if self.stream.is_tombstoned() {
            return DiscardDecision::Discard;
        }

        if self
            .stream
            .truncate_before_or_max_count()
            .should_discard(event.event_number)
        {
            return DiscardDecision::Discard;
        }

        let Some(cutoff) = self.stream.cutoff_time() else {
            return DiscardDecision::Keep;
        };

        let chunk = logical_chunk_number(event.log_position, self.chunk_size);
        match chunk_range(chunk) {
            None => DiscardDecision::AlreadyDiscarded,
            Some(range) if range.max < cutoff => DiscardDecision::Discard,
            Some(range) if range.min >= cutoff => DiscardDecision::Keep,
            Some(_) => DiscardDecision::MaybeDiscard,
        }
    }
}
