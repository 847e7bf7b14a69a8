//! Per-chunk weight buffered in memory until the owning transaction commits.

use std::collections::HashMap;

use chunklog_core::{logical_chunk_number, state::IncreaseChunkWeights, Result};

pub const DISCARD_WEIGHT: f32 = 2.0;
pub const MAYBE_DISCARD_WEIGHT: f32 = 1.0;

#[derive(Debug)]
pub struct WeightAccumulator {
    chunk_size: u64,
    weights: HashMap<u32, f32>,
}

impl WeightAccumulator {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            weights: HashMap::new(),
        }
    }

    /// The record at `log_position` will certainly be removed.
    pub fn on_discard(&mut self, log_position: u64) {
        self.add(log_position, DISCARD_WEIGHT);
    }

    /// The record at `log_position` might be removed, depending on its exact timestamp.
    pub fn on_maybe_discard(&mut self, log_position: u64) {
        self.add(log_position, MAYBE_DISCARD_WEIGHT);
    }

    pub fn pending(&self, logical_chunk_number: u32) -> f32 {
        self.weights.get(&logical_chunk_number).copied().unwrap_or(0.0)
    }

    /// Add everything buffered to the state and clear the buffer.
    pub fn flush<S>(&mut self, state: &S) -> Result<()>
    where
        S: IncreaseChunkWeights + ?Sized,
    {
        let mut pending: Vec<(u32, f32)> = self.weights.drain().collect();
        pending.sort_by_key(|(chunk, _)| *chunk);
        for (chunk, weight) in pending {
            state.increase_chunk_weight(chunk, weight)?;
        }
        Ok(())
    }

    fn add(&mut self, log_position: u64, weight: f32) {
        let chunk = logical_chunk_number(log_position, self.chunk_size);
        *self.weights.entry(chunk).or_insert(0.0) += weight;
    }
}
