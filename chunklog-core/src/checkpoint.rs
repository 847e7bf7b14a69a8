//! Per-phase resume cursors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stream::StreamHandle;
use crate::types::ScavengePoint;

/// Persisted progress of a scavenge. One variant per phase, each carrying
/// the scavenge point it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScavengeCheckpoint {
    Accumulating {
        scavenge_point: ScavengePoint,
        done_logical_chunk_number: Option<u32>,
    },
    Calculating {
        scavenge_point: ScavengePoint,
        done_stream_handle: Option<StreamHandle>,
    },
    ExecutingChunks {
        scavenge_point: ScavengePoint,
        done_logical_chunk_number: Option<u32>,
    },
    MergingChunks {
        scavenge_point: ScavengePoint,
    },
    ExecutingIndex {
        scavenge_point: ScavengePoint,
    },
    Cleaning {
        scavenge_point: ScavengePoint,
    },
    Done {
        scavenge_point: ScavengePoint,
    },
}

impl ScavengeCheckpoint {
    pub fn scavenge_point(&self) -> &ScavengePoint {
        match self {
            ScavengeCheckpoint::Accumulating { scavenge_point, .. }
            | ScavengeCheckpoint::Calculating { scavenge_point, .. }
            | ScavengeCheckpoint::ExecutingChunks { scavenge_point, .. }
            | ScavengeCheckpoint::MergingChunks { scavenge_point }
            | ScavengeCheckpoint::ExecutingIndex { scavenge_point }
            | ScavengeCheckpoint::Cleaning { scavenge_point }
            | ScavengeCheckpoint::Done { scavenge_point } => scavenge_point,
        }
    }

    pub fn phase_name(&self) -> &'static str {
        match self {
            ScavengeCheckpoint::Accumulating { .. } => "Accumulating",
            ScavengeCheckpoint::Calculating { .. } => "Calculating",
            ScavengeCheckpoint::ExecutingChunks { .. } => "Executing chunks",
            ScavengeCheckpoint::MergingChunks { .. } => "Merging chunks",
            ScavengeCheckpoint::ExecutingIndex { .. } => "Executing index",
            ScavengeCheckpoint::Cleaning { .. } => "Cleaning",
            ScavengeCheckpoint::Done { .. } => "Done",
        }
    }
}

impl fmt::Display for ScavengeCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScavengeCheckpoint::Accumulating { scavenge_point, done_logical_chunk_number }
            | ScavengeCheckpoint::ExecutingChunks { scavenge_point, done_logical_chunk_number } => {
                match done_logical_chunk_number {
                    Some(n) => write!(f, "{} {} done chunk {}", self.phase_name(), scavenge_point.name(), n),
                    None => write!(f, "{} {} start", self.phase_name(), scavenge_point.name()),
                }
            }
            ScavengeCheckpoint::Calculating { scavenge_point, done_stream_handle } => match done_stream_handle {
                Some(h) => write!(f, "{} {} done {}", self.phase_name(), scavenge_point.name(), h),
                None => write!(f, "{} {} start", self.phase_name(), scavenge_point.name()),
            },
            other => write!(f, "{} {}", other.phase_name(), other.scavenge_point().name()),
        }
    }
}
