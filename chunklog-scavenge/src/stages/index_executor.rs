//! # Index Execution
//!
//! Hands the index scavenger a keep-predicate built from the calculated
//! discard points. Index entries arrive grouped by stream hash with
//! descending versions, so the resolution of a hash is cached until the
//! hash changes.

use std::sync::Arc;
use tracing::{debug, info, warn};

use chunklog_core::{
    state::ScavengeStateForIndexExecutor,
    traits::{ChunkReaderForIndexExecutor, IndexScavenger, ScavengerLog},
    types::IndexEntry,
    Cancellation, IndexExecutionInfo, Result, ScavengeCheckpoint, ScavengePoint, StreamHandle,
};

pub struct IndexExecutor {
    index_scavenger: Arc<dyn IndexScavenger>,
    chunk_reader: Arc<dyn ChunkReaderForIndexExecutor>,
}

/// Resolution of the most recent index entry.
struct LastSeen {
    handle: StreamHandle,
    info: Option<IndexExecutionInfo>,
    position: u64,
}

impl IndexExecutor {
    pub fn new(
        index_scavenger: Arc<dyn IndexScavenger>,
        chunk_reader: Arc<dyn ChunkReaderForIndexExecutor>,
    ) -> Self {
        Self {
            index_scavenger,
            chunk_reader,
        }
    }

    pub async fn execute<S>(
        &self,
        scavenge_point: &ScavengePoint,
        state: &S,
        log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()>
    where
        S: ScavengeStateForIndexExecutor + ?Sized,
    {
        info!("SCAVENGING: Executing index up to {}", scavenge_point);

        let mut last: Option<LastSeen> = None;
        let mut should_keep = |entry: &IndexEntry| -> Result<bool> {
            let keep = self.should_keep(entry, scavenge_point, state, &mut last)?;
            log.index_entry_processed(keep);
            Ok(keep)
        };

        self.index_scavenger
            .scavenge_index(scavenge_point.position, &mut should_keep, log, cancel)
            .await?;

        state.set_checkpoint(ScavengeCheckpoint::Cleaning {
            scavenge_point: scavenge_point.clone(),
        })
    }

    fn should_keep<S>(
        &self,
        entry: &IndexEntry,
        scavenge_point: &ScavengePoint,
        state: &S,
        last: &mut Option<LastSeen>,
    ) -> Result<bool>
    where
        S: ScavengeStateForIndexExecutor + ?Sized,
    {
        if entry.position >= scavenge_point.position {
            return Ok(true);
        }

        let info = if state.is_collision_hash(entry.stream) {
            // several streams share this hash, find out which one the entry is for
            let Some(stream_id) = self.chunk_reader.try_get_stream_id(entry.position)? else {
                debug!(
                    "SCAVENGING: No record at {} for index entry {}@{}, discarding",
                    entry.position, entry.version, entry.stream
                );
                return Ok(false);
            };
            let handle = StreamHandle::Id(stream_id);
            let info = state.index_execution_info(&handle);
            remember(last, handle, info, entry.position);
            info
        } else {
            let handle = StreamHandle::Hash(entry.stream);
            let info = match last {
                Some(seen) if seen.handle == handle => seen.info,
                _ => state.index_execution_info(&handle),
            };
            remember(last, handle, info, entry.position);
            info
        };

        let Some(info) = info else {
            return Ok(true);
        };

        if info.is_metastream && info.is_tombstoned {
            return Ok(false);
        }

        Ok(!info.discard_point.should_discard(entry.version))
    }
}

fn remember(last: &mut Option<LastSeen>, handle: StreamHandle, info: Option<IndexExecutionInfo>, position: u64) {
    if let Some(seen) = last.as_ref() {
        if seen.handle == handle && position > seen.position {
            warn!(
                "SCAVENGING: Index entries for {} are out of order: position {} follows {}",
                handle, position, seen.position
            );
        }
    }
    *last = Some(LastSeen {
        handle,
        info,
        position,
    });
}
