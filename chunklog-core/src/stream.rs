//! Stream handles, per-stream scavenge facts and stream naming rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::discard::DiscardPoint;
use crate::types::{StreamId, StreamMetadata};

/// Reference to a stream in the scavenge state.
///
/// `Hash` is cheap but ambiguous once two streams share a hash; after a
/// collision is detected both streams are addressed by `Id`. Hash handles
/// order before id handles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamHandle {
    Hash(u64),
    Id(StreamId),
}

impl StreamHandle {
    pub fn is_hash(&self) -> bool {
        matches!(self, StreamHandle::Hash(_))
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamHandle::Hash(h) => write!(f, "Hash: {}", h),
            StreamHandle::Id(id) => write!(f, "Id: {}", id),
        }
    }
}

/// Whether the calculator still has work to do for a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculationStatus {
    /// Discard points can still move; recalculated every scavenge.
    #[default]
    Active,
    /// Tombstoned; discard points are final.
    Archived,
    /// No retention policy left to apply.
    Spent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalStreamData {
    pub status: CalculationStatus,
    pub discard_point: DiscardPoint,
    pub maybe_discard_point: DiscardPoint,
    pub is_tombstoned: bool,
    pub max_age: Option<Duration>,
    pub max_count: Option<i64>,
    pub truncate_before: Option<i64>,
}

impl OriginalStreamData {
    pub fn apply_metadata(&mut self, metadata: &StreamMetadata) {
        self.max_age = metadata.max_age;
        self.max_count = metadata.max_count;
        self.truncate_before = metadata.truncate_before;
        self.status = CalculationStatus::Active;
    }

    pub fn apply_tombstone(&mut self) {
        self.is_tombstoned = true;
        self.status = CalculationStatus::Active;
    }

    pub fn has_retention_policy(&self) -> bool {
        self.max_age.is_some() || self.max_count.is_some() || self.truncate_before.is_some()
    }

    pub fn execution_info(&self) -> ChunkExecutionInfo {
        ChunkExecutionInfo {
            is_tombstoned: self.is_tombstoned,
            discard_point: self.discard_point,
            maybe_discard_point: self.maybe_discard_point,
            max_age: self.max_age,
        }
    }
}

/// Facts about a metadata stream itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetastreamData {
    pub is_tombstoned: bool,
    pub discard_point: DiscardPoint,
}

/// Read-only projection used while rewriting chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkExecutionInfo {
    pub is_tombstoned: bool,
    pub discard_point: DiscardPoint,
    pub maybe_discard_point: DiscardPoint,
    pub max_age: Option<Duration>,
}

/// Read-only projection used while rewriting the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexExecutionInfo {
    pub is_metastream: bool,
    pub is_tombstoned: bool,
    pub discard_point: DiscardPoint,
}

/// Naming relation between streams and their metadata streams.
pub trait MetastreamLookup: Send + Sync {
    fn is_metastream(&self, stream_id: &str) -> bool;
    fn metastream_of(&self, original: &str) -> StreamId;
    fn original_stream_of(&self, metastream: &str) -> StreamId;
}

/// Metadata streams are named `$$<original>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DollarMetastreamLookup;

impl MetastreamLookup for DollarMetastreamLookup {
    fn is_metastream(&self, stream_id: &str) -> bool {
        stream_id.starts_with("$$")
    }

    fn metastream_of(&self, original: &str) -> StreamId {
        format!("$${}", original)
    }

    fn original_stream_of(&self, metastream: &str) -> StreamId {
        metastream
            .strip_prefix("$$")
            .unwrap_or(metastream)
            .to_string()
    }
}

/// Hash used by the secondary index.
pub trait StreamHasher: Send + Sync {
    fn hash(&self, stream_id: &str) -> u64;
}

/// Two crc32 halves, the second over the reversed bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32StreamHasher;

impl StreamHasher for Crc32StreamHasher {
    fn hash(&self, stream_id: &str) -> u64 {
        let high = crc32fast::hash(stream_id.as_bytes()) as u64;
        let reversed: Vec<u8> = stream_id.bytes().rev().collect();
        let low = crc32fast::hash(&reversed) as u64;
        (high << 32) | low
    }
}
