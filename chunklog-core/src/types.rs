//! # Core Types
//!
//! Records, positions and scavenge points shared by the scavenger and
//! its collaborators.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timestamp type used throughout the system
pub type Timestamp = DateTime<Utc>;

/// Stream identifier as written in the log
pub type StreamId = String;

/// Event number carried by a tombstone.
pub const DELETED_STREAM_EVENT_NUMBER: i64 = i64::MAX;

/// Logical chunk holding `position`.
pub fn logical_chunk_number(position: u64, chunk_size: u64) -> u32 {
    (position / chunk_size) as u32
}

/// Immutable marker bounding and parameterizing one scavenge run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScavengePoint {
    /// Log position of the scavenge point record. Nothing at or after it is touched.
    pub position: u64,
    /// Event number of the scavenge point in the scavenge point stream.
    pub event_number: i64,
    /// Frozen "now" used for every max-age comparison of the run.
    pub effective_now: Timestamp,
    /// Physical chunks with a weight above this are rewritten.
    pub threshold: i32,
}

impl ScavengePoint {
    pub fn new(position: u64, event_number: i64, effective_now: Timestamp, threshold: i32) -> Self {
        Self {
            position,
            event_number,
            effective_now,
            threshold,
        }
    }

    pub fn name(&self) -> String {
        format!("SP-{}", self.event_number)
    }
}

impl fmt::Display for ScavengePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (position {}, effective now {}, threshold {})",
            self.name(),
            self.position,
            self.effective_now,
            self.threshold
        )
    }
}

/// Creation-time bound of the records of one logical chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTimeStampRange {
    pub min: Timestamp,
    pub max: Timestamp,
}

impl ChunkTimeStampRange {
    pub fn new(min: Timestamp, max: Timestamp) -> Self {
        Self { min, max }
    }

    /// Range that any real timestamp widens.
    pub fn empty() -> Self {
        Self {
            min: DateTime::<Utc>::MAX_UTC,
            max: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn include(&mut self, time_stamp: Timestamp) {
        if time_stamp < self.min {
            self.min = time_stamp;
        }
        if time_stamp > self.max {
            self.max = time_stamp;
        }
    }
}

/// Retention policy parsed from a metadata stream record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub max_count: Option<i64>,
    pub max_age: Option<Duration>,
    pub truncate_before: Option<i64>,
}

#[derive(Deserialize)]
struct RawStreamMetadata {
    #[serde(rename = "$maxCount")]
    max_count: Option<i64>,
    #[serde(rename = "$maxAge")]
    max_age: Option<u64>,
    #[serde(rename = "$tb")]
    truncate_before: Option<i64>,
}

impl StreamMetadata {
    /// Parse metadata json. Data that does not parse clears the metadata.
    pub fn from_json(data: &[u8]) -> Self {
        match serde_json::from_slice::<RawStreamMetadata>(data) {
            Ok(raw) => Self {
                max_count: raw.max_count.filter(|c| *c > 0),
                max_age: raw.max_age.filter(|a| *a > 0).map(Duration::from_secs),
                truncate_before: raw.truncate_before.filter(|tb| *tb >= 0),
            },
            Err(e) => {
                tracing::debug!("Unparseable stream metadata treated as empty: {}", e);
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_count.is_none() && self.max_age.is_none() && self.truncate_before.is_none()
    }
}

/// Position of one event of a stream as known to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventInfo {
    pub log_position: u64,
    pub event_number: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReadEventInfoResult {
    pub event_infos: Vec<EventInfo>,
    pub is_end_of_stream: bool,
    pub next_event_number: i64,
}

/// Entry of the secondary index, keyed by stream hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub stream: u64,
    pub version: i64,
    pub position: u64,
}

// ============================================================================
// Accumulator records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorRecordType {
    OriginalStream,
    MetadataStream,
    Tombstone,
}

/// Buffers below are reused between reads; contents are valid until the next read.
#[derive(Debug, Clone)]
pub struct OriginalStreamRecord {
    pub stream_id: StreamId,
    pub log_position: u64,
    pub time_stamp: Timestamp,
}

impl Default for OriginalStreamRecord {
    fn default() -> Self {
        Self {
            stream_id: StreamId::new(),
            log_position: 0,
            time_stamp: DateTime::<Utc>::MIN_UTC,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataStreamRecord {
    pub stream_id: StreamId,
    pub log_position: u64,
    pub time_stamp: Timestamp,
    pub event_number: i64,
    pub metadata: StreamMetadata,
}

impl Default for MetadataStreamRecord {
    fn default() -> Self {
        Self {
            stream_id: StreamId::new(),
            log_position: 0,
            time_stamp: DateTime::<Utc>::MIN_UTC,
            event_number: 0,
            metadata: StreamMetadata::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TombstoneRecord {
    pub stream_id: StreamId,
    pub log_position: u64,
    pub time_stamp: Timestamp,
    pub event_number: i64,
}

impl Default for TombstoneRecord {
    fn default() -> Self {
        Self {
            stream_id: StreamId::new(),
            log_position: 0,
            time_stamp: DateTime::<Utc>::MIN_UTC,
            event_number: 0,
        }
    }
}

// ============================================================================
// Executor records
// ============================================================================

/// Event record as seen by the chunk executor.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareRecord {
    pub stream_id: StreamId,
    pub log_position: u64,
    pub event_number: i64,
    pub time_stamp: Timestamp,
    /// False for prepares that belong to an explicit multi-record transaction.
    pub is_self_committed: bool,
    pub is_tombstone: bool,
    pub is_transaction_begin: bool,
    pub payload: Bytes,
}

/// Commit and system records, always kept.
#[derive(Debug, Clone, PartialEq)]
pub struct NonPrepareRecord {
    pub log_position: u64,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordForExecutor {
    Prepare(PrepareRecord),
    NonPrepare(NonPrepareRecord),
}

impl RecordForExecutor {
    pub fn log_position(&self) -> u64 {
        match self {
            RecordForExecutor::Prepare(p) => p.log_position,
            RecordForExecutor::NonPrepare(n) => n.log_position,
        }
    }
}

/// Outcome of one scavenge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScavengeResult {
    Success,
    Stopped,
    Errored,
}

impl fmt::Display for ScavengeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScavengeResult::Success => write!(f, "Success"),
            ScavengeResult::Stopped => write!(f, "Stopped"),
            ScavengeResult::Errored => write!(f, "Errored"),
        }
    }
}
