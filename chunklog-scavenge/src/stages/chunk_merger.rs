//! Optional merge of adjacent scavenged chunks, delegated to a backend.

use std::sync::Arc;
use tracing::info;

use chunklog_core::{
    state::ScavengeStateForChunkMerger, traits::ChunkMergerBackend, traits::ScavengerLog,
    Cancellation, Result, ScavengeCheckpoint, ScavengePoint,
};

pub struct ChunkMerger {
    merge_chunks: bool,
    backend: Arc<dyn ChunkMergerBackend>,
}

impl ChunkMerger {
    pub fn new(merge_chunks: bool, backend: Arc<dyn ChunkMergerBackend>) -> Self {
        Self { merge_chunks, backend }
    }

    pub async fn merge<S>(
        &self,
        scavenge_point: &ScavengePoint,
        state: &S,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        S: ScavengeStateForChunkMerger + ?Sized,
    {
        if self.merge_chunks {
            info!("SCAVENGING: Merging chunks for {}", scavenge_point);
            self.backend.merge_chunks(scavenge_point, log, cancel).await?;
        } else {
            info!("SCAVENGING: Merging chunks is disabled");
        }

        state.set_checkpoint(ScavengeCheckpoint::ExecutingIndex {
            scavenge_point: scavenge_point.clone(),
        })
    }
}
