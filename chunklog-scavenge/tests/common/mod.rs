//! In-memory log database and collaborator fakes shared by the scavenger
//! integration tests.
//!
//! Logical chunks hold up to ten records, one every `RECORD_SIZE` bytes.
//! Physical chunks are the logical chunks; scavenged records keep their
//! log positions. Stream ids that share the part before `|` collide.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chunklog_core::{
    state::*,
    traits::*,
    types::{
        AccumulatorRecordType, EventInfo, IndexEntry, IndexReadEventInfoResult,
        MetadataStreamRecord, OriginalStreamRecord, PrepareRecord, RecordForExecutor,
        TombstoneRecord, DELETED_STREAM_EVENT_NUMBER,
    },
    Cancellation, CancellationSource, CalculationStatus, ChunkTimeStampRange, Crc32StreamHasher,
    DiscardPoint, DollarMetastreamLookup, Error, IndexExecutionInfo, OriginalStreamData, Result,
    ScavengeCheckpoint, ScavengeConfig, ScavengePoint, StreamHandle, StreamHasher, StreamId,
    StreamMetadata, Timestamp,
};
use chunklog_scavenge::{Scavenger, ScavengerCollaborators};
use chunklog_storage::ScavengeStateStore;

pub const CHUNK_SIZE: u64 = 1000;
pub const RECORD_SIZE: u64 = 100;
pub const RECORDS_PER_CHUNK: usize = 10;
pub const SCAVENGE_POINTS_STREAM: &str = "$scavengePoints";

// =============================================================================
// Hashing
// =============================================================================

/// Hashes only the part of the stream id before `|`.
pub struct TestHasher;

impl StreamHasher for TestHasher {
    fn hash(&self, stream_id: &str) -> u64 {
        let key = stream_id.split('|').next().unwrap_or(stream_id);
        Crc32StreamHasher.hash(key)
    }
}

// =============================================================================
// Log database
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Event,
    Metadata,
    Tombstone,
    ScavengePoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub stream_id: StreamId,
    pub log_position: u64,
    pub event_number: i64,
    pub time_stamp: Timestamp,
    pub kind: RecordKind,
    pub metadata: Option<StreamMetadata>,
}

#[derive(Debug, Default)]
pub struct FakeChunk {
    pub records: Vec<LogRecord>,
    pub complete: bool,
    pub remote: bool,
    pub rewrites: u32,
}

pub struct LogDb {
    pub now: Timestamp,
    pub chunks: Vec<FakeChunk>,
    index: Vec<(IndexEntry, StreamId)>,
    next_event_numbers: HashMap<StreamId, i64>,
    scavenge_points: Vec<ScavengePoint>,
    /// (chunk, delete_immediately) for every aborted rewrite.
    pub aborted: Vec<(u32, bool)>,
    pub fail_writes_in_chunk: Option<u32>,
    pub cancel_on_write: Option<CancellationSource>,
    pub merges: u32,
}

pub type SharedDb = Arc<Mutex<LogDb>>;

impl LogDb {
    pub fn new() -> Self {
        Self {
            now: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            chunks: Vec::new(),
            index: Vec::new(),
            next_event_numbers: HashMap::new(),
            scavenge_points: Vec::new(),
            aborted: Vec::new(),
            fail_writes_in_chunk: None,
            cancel_on_write: None,
            merges: 0,
        }
    }

    pub fn shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    pub fn ago(&self, age_secs: i64) -> Timestamp {
        self.now - ChronoDuration::seconds(age_secs)
    }

    fn append(
        &mut self,
        stream_id: &str,
        event_number: i64,
        age_secs: i64,
        kind: RecordKind,
        metadata: Option<StreamMetadata>,
    ) -> u64 {
        if self.chunks.last().map_or(true, |c| c.complete) {
            self.chunks.push(FakeChunk::default());
        }
        let number = self.chunks.len() - 1;
        let time_stamp = self.ago(age_secs);
        let chunk = &mut self.chunks[number];
        let log_position = number as u64 * CHUNK_SIZE + chunk.records.len() as u64 * RECORD_SIZE;

        chunk.records.push(LogRecord {
            stream_id: stream_id.to_string(),
            log_position,
            event_number,
            time_stamp,
            kind,
            metadata,
        });
        if chunk.records.len() == RECORDS_PER_CHUNK {
            chunk.complete = true;
        }

        self.index.push((
            IndexEntry {
                stream: TestHasher.hash(stream_id),
                version: event_number,
                position: log_position,
            },
            stream_id.to_string(),
        ));
        log_position
    }

    fn next_event_number(&mut self, stream_id: &str) -> i64 {
        let next = self.next_event_numbers.entry(stream_id.to_string()).or_insert(0);
        let event_number = *next;
        *next += 1;
        event_number
    }

    pub fn event(&mut self, stream_id: &str, age_secs: i64) -> i64 {
        let event_number = self.next_event_number(stream_id);
        self.append(stream_id, event_number, age_secs, RecordKind::Event, None);
        event_number
    }

    /// Write metadata json for `stream_id` into its metadata stream.
    pub fn metadata(&mut self, stream_id: &str, json: &str, age_secs: i64) -> i64 {
        let metastream = format!("$${}", stream_id);
        let event_number = self.next_event_number(&metastream);
        self.metadata_at(stream_id, event_number, json, age_secs);
        event_number
    }

    /// Metadata with an explicit event number, for out-of-order writes.
    pub fn metadata_at(&mut self, stream_id: &str, event_number: i64, json: &str, age_secs: i64) {
        let metastream = format!("$${}", stream_id);
        let next = self.next_event_numbers.entry(metastream.clone()).or_insert(0);
        *next = (*next).max(event_number + 1);
        let metadata = StreamMetadata::from_json(json.as_bytes());
        self.append(&metastream, event_number, age_secs, RecordKind::Metadata, Some(metadata));
    }

    pub fn tombstone(&mut self, stream_id: &str, age_secs: i64) {
        self.append(
            stream_id,
            DELETED_STREAM_EVENT_NUMBER,
            age_secs,
            RecordKind::Tombstone,
            None,
        );
    }

    /// An event in a chunk of its own whose record an earlier scavenge has
    /// already removed. Only the index still knows about it.
    pub fn indexed_only_event(&mut self, stream_id: &str) -> i64 {
        self.complete_chunk();
        let event_number = self.event(stream_id, 0);
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.records.pop();
            chunk.complete = true;
        }
        event_number
    }

    pub fn complete_chunk(&mut self) {
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.complete = true;
        }
    }

    /// Append a scavenge point record and complete its chunk.
    pub fn add_scavenge_point(&mut self, threshold: i32) -> ScavengePoint {
        let event_number = self.next_event_number(SCAVENGE_POINTS_STREAM);
        let position = self.append(SCAVENGE_POINTS_STREAM, event_number, 0, RecordKind::ScavengePoint, None);
        self.complete_chunk();
        let sp = ScavengePoint::new(position, event_number, self.now, threshold);
        self.scavenge_points.push(sp.clone());
        sp
    }

    pub fn latest_scavenge_point(&self) -> Option<ScavengePoint> {
        self.scavenge_points.last().cloned()
    }

    /// Event numbers of `stream_id` still present in the chunks.
    pub fn events_of(&self, stream_id: &str) -> Vec<i64> {
        self.chunks
            .iter()
            .flat_map(|c| c.records.iter())
            .filter(|r| r.stream_id == stream_id)
            .map(|r| r.event_number)
            .collect()
    }

    /// Versions of `stream_id` still present in the index.
    pub fn index_versions_of(&self, stream_id: &str) -> Vec<i64> {
        let mut versions: Vec<i64> = self
            .index
            .iter()
            .filter(|(_, id)| id == stream_id)
            .map(|(entry, _)| entry.version)
            .collect();
        versions.sort_unstable();
        versions
    }

    pub fn chunk_positions(&self) -> Vec<Vec<u64>> {
        self.chunks
            .iter()
            .map(|c| c.records.iter().map(|r| r.log_position).collect())
            .collect()
    }

    pub fn index_snapshot(&self) -> Vec<(u64, i64, u64)> {
        let mut entries: Vec<_> = self
            .index
            .iter()
            .map(|(e, _)| (e.stream, e.version, e.position))
            .collect();
        entries.sort_unstable();
        entries
    }

    pub fn rewrites(&self) -> Vec<u32> {
        self.chunks.iter().map(|c| c.rewrites).collect()
    }

    fn read_index(&self, handle: &StreamHandle, scavenge_point: &ScavengePoint) -> Vec<EventInfo> {
        let mut infos: Vec<EventInfo> = self
            .index
            .iter()
            .filter(|(entry, id)| {
                entry.position < scavenge_point.position
                    && match handle {
                        StreamHandle::Hash(hash) => entry.stream == *hash,
                        StreamHandle::Id(stream_id) => id == stream_id,
                    }
            })
            .map(|(entry, _)| EventInfo {
                log_position: entry.position,
                event_number: entry.version,
            })
            .collect();
        infos.sort_by_key(|i| (i.event_number, i.log_position));
        infos
    }

    fn record_at(&self, position: u64) -> Option<&LogRecord> {
        let chunk = self.chunks.get((position / CHUNK_SIZE) as usize)?;
        chunk.records.iter().find(|r| r.log_position == position)
    }
}

// =============================================================================
// Chunk readers and writers
// =============================================================================

pub struct FakeLog {
    db: SharedDb,
}

struct AccumulatorCursor {
    records: VecDeque<LogRecord>,
}

#[async_trait]
impl AccumulatorChunkCursor for AccumulatorCursor {
    async fn next_into(
        &mut self,
        original: &mut OriginalStreamRecord,
        metadata: &mut MetadataStreamRecord,
        tombstone: &mut TombstoneRecord,
    ) -> Result<Option<AccumulatorRecordType>> {
        let Some(record) = self.records.pop_front() else {
            return Ok(None);
        };
        let kind = match record.kind {
            RecordKind::Event | RecordKind::ScavengePoint => {
                original.stream_id = record.stream_id;
                original.log_position = record.log_position;
                original.time_stamp = record.time_stamp;
                AccumulatorRecordType::OriginalStream
            }
            RecordKind::Metadata => {
                metadata.stream_id = record.stream_id;
                metadata.log_position = record.log_position;
                metadata.time_stamp = record.time_stamp;
                metadata.event_number = record.event_number;
                metadata.metadata = record.metadata.unwrap_or_default();
                AccumulatorRecordType::MetadataStream
            }
            RecordKind::Tombstone => {
                tombstone.stream_id = record.stream_id;
                tombstone.log_position = record.log_position;
                tombstone.time_stamp = record.time_stamp;
                tombstone.event_number = record.event_number;
                AccumulatorRecordType::Tombstone
            }
        };
        Ok(Some(kind))
    }
}

#[async_trait]
impl ChunkReaderForAccumulator for FakeLog {
    async fn read_chunk(&self, logical_chunk_number: u32) -> Result<Box<dyn AccumulatorChunkCursor>> {
        let db = self.db.lock();
        let records = db
            .chunks
            .get(logical_chunk_number as usize)
            .map(|c| c.records.iter().cloned().collect())
            .unwrap_or_default();
        Ok(Box::new(AccumulatorCursor { records }))
    }
}

pub struct FakePhysicalChunk {
    db: SharedDb,
    number: u32,
    name: String,
    file_size: u64,
    read_only: bool,
    remote: bool,
    records: Vec<LogRecord>,
}

struct ExecutorCursor {
    records: VecDeque<RecordForExecutor>,
}

#[async_trait]
impl ExecutorRecordCursor for ExecutorCursor {
    async fn next_record(&mut self) -> Result<Option<RecordForExecutor>> {
        Ok(self.records.pop_front())
    }
}

#[async_trait]
impl ChunkReaderForExecutor for FakePhysicalChunk {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn chunk_start_number(&self) -> u32 {
        self.number
    }

    fn chunk_end_number(&self) -> u32 {
        self.number
    }

    fn chunk_start_position(&self) -> u64 {
        u64::from(self.number) * CHUNK_SIZE
    }

    fn chunk_end_position(&self) -> u64 {
        u64::from(self.number + 1) * CHUNK_SIZE
    }

    async fn read_records(&self) -> Result<Box<dyn ExecutorRecordCursor>> {
        let records = self
            .records
            .iter()
            .map(|r| {
                RecordForExecutor::Prepare(PrepareRecord {
                    stream_id: r.stream_id.clone(),
                    log_position: r.log_position,
                    event_number: r.event_number,
                    time_stamp: r.time_stamp,
                    is_self_committed: true,
                    is_tombstone: r.kind == RecordKind::Tombstone,
                    is_transaction_begin: false,
                    payload: Bytes::from(r.stream_id.clone()),
                })
            })
            .collect();
        Ok(Box::new(ExecutorCursor { records }))
    }
}

pub struct FakeChunkWriter {
    db: SharedDb,
    number: u32,
    file_name: String,
    kept: HashSet<u64>,
}

#[async_trait]
impl ChunkWriterForExecutor for FakeChunkWriter {
    fn local_file_name(&self) -> &str {
        &self.file_name
    }

    async fn write_record(&mut self, record: &RecordForExecutor) -> Result<()> {
        let db = self.db.lock();
        if let Some(source) = &db.cancel_on_write {
            source.cancel();
        }
        if db.fail_writes_in_chunk == Some(self.number) {
            return Err(Error::FileBeingDeleted {
                file: format!("chunk-{:06}", self.number),
            });
        }
        self.kept.insert(record.log_position());
        Ok(())
    }

    async fn complete(&mut self) -> Result<(String, u64)> {
        let mut db = self.db.lock();
        let chunk = &mut db.chunks[self.number as usize];
        chunk.records.retain(|r| self.kept.contains(&r.log_position));
        chunk.rewrites += 1;
        Ok((
            format!("chunk-{:06}.scavenged", self.number),
            self.kept.len() as u64 * RECORD_SIZE,
        ))
    }

    fn abort(&mut self, delete_immediately: bool) {
        self.db.lock().aborted.push((self.number, delete_immediately));
    }
}

#[async_trait]
impl ChunkManagerForChunkExecutor for FakeLog {
    fn get_chunk_reader_for(&self, position: u64) -> Result<Arc<dyn ChunkReaderForExecutor>> {
        let db = self.db.lock();
        let number = (position / CHUNK_SIZE) as u32;
        let chunk = db
            .chunks
            .get(number as usize)
            .ok_or_else(|| Error::invariant(format!("no chunk at position {}", position)))?;
        Ok(Arc::new(FakePhysicalChunk {
            db: Arc::clone(&self.db),
            number,
            name: format!("chunk-{:06}", number),
            file_size: chunk.records.len() as u64 * RECORD_SIZE,
            read_only: chunk.complete,
            remote: chunk.remote,
            records: chunk.records.clone(),
        }))
    }

    async fn create_chunk_writer(
        &self,
        source: &dyn ChunkReaderForExecutor,
    ) -> Result<Box<dyn ChunkWriterForExecutor>> {
        Ok(Box::new(FakeChunkWriter {
            db: Arc::clone(&self.db),
            number: source.chunk_start_number(),
            file_name: format!("{}.tmp", source.name()),
            kept: HashSet::new(),
        }))
    }
}

impl ChunkReaderForIndexExecutor for FakeLog {
    fn try_get_stream_id(&self, position: u64) -> Result<Option<StreamId>> {
        Ok(self.db.lock().record_at(position).map(|r| r.stream_id.clone()))
    }
}

// =============================================================================
// Index
// =============================================================================

pub struct FakeIndex {
    db: SharedDb,
}

impl FakeIndex {
    fn forward(
        &self,
        handle: &StreamHandle,
        from_event_number: i64,
        max_count: usize,
        scavenge_point: &ScavengePoint,
    ) -> IndexReadEventInfoResult {
        let infos: Vec<EventInfo> = self
            .db
            .lock()
            .read_index(handle, scavenge_point)
            .into_iter()
            .filter(|i| i.event_number >= from_event_number)
            .collect();
        let is_end_of_stream = infos.len() <= max_count;
        let event_infos: Vec<EventInfo> = infos.into_iter().take(max_count).collect();
        let next_event_number = event_infos
            .last()
            .map(|i| i.event_number.saturating_add(1))
            .unwrap_or(from_event_number);
        IndexReadEventInfoResult {
            event_infos,
            is_end_of_stream,
            next_event_number,
        }
    }
}

#[async_trait]
impl IndexReaderForAccumulator for FakeIndex {
    async fn read_event_info_forward(
        &self,
        handle: &StreamHandle,
        from_event_number: i64,
        max_count: usize,
        scavenge_point: &ScavengePoint,
    ) -> Result<IndexReadEventInfoResult> {
        Ok(self.forward(handle, from_event_number, max_count, scavenge_point))
    }

    async fn read_event_info_backward(
        &self,
        handle: &StreamHandle,
        from_event_number: Option<i64>,
        max_count: usize,
        scavenge_point: &ScavengePoint,
    ) -> Result<IndexReadEventInfoResult> {
        let mut infos: Vec<EventInfo> = self
            .db
            .lock()
            .read_index(handle, scavenge_point)
            .into_iter()
            .filter(|i| from_event_number.map_or(true, |from| i.event_number <= from))
            .collect();
        infos.reverse();
        let is_end_of_stream = infos.len() <= max_count;
        let event_infos: Vec<EventInfo> = infos.into_iter().take(max_count).collect();
        let next_event_number = event_infos
            .last()
            .map(|i| i.event_number - 1)
            .unwrap_or(-1);
        Ok(IndexReadEventInfoResult {
            event_infos,
            is_end_of_stream,
            next_event_number,
        })
    }
}

#[async_trait]
impl IndexReaderForCalculator for FakeIndex {
    async fn last_event_number(
        &self,
        handle: &StreamHandle,
        scavenge_point: &ScavengePoint,
    ) -> Result<Option<i64>> {
        Ok(self
            .db
            .lock()
            .read_index(handle, scavenge_point)
            .iter()
            .map(|i| i.event_number)
            .max())
    }

    async fn read_event_info_forward(
        &self,
        handle: &StreamHandle,
        from_event_number: i64,
        max_count: usize,
        scavenge_point: &ScavengePoint,
    ) -> Result<IndexReadEventInfoResult> {
        Ok(self.forward(handle, from_event_number, max_count, scavenge_point))
    }
}

#[async_trait]
impl IndexScavenger for FakeIndex {
    async fn scavenge_index(
        &self,
        _up_to_position: u64,
        should_keep: &mut ShouldKeep<'_>,
        _log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()> {
        // the predicate reads the log, so the lock is not held while it runs
        let mut entries = self.db.lock().index.clone();
        entries.sort_by(|a, b| a.0.stream.cmp(&b.0.stream).then(b.0.version.cmp(&a.0.version)));

        let mut kept = Vec::with_capacity(entries.len());
        for (entry, stream_id) in entries {
            cancel.check()?;
            if should_keep(&entry)? {
                kept.push((entry, stream_id));
            }
        }
        self.db.lock().index = kept;
        Ok(())
    }
}

// =============================================================================
// Scavenge points, merger and archive
// =============================================================================

pub struct FakeScavengePoints {
    db: SharedDb,
}

#[async_trait]
impl ScavengePointSource for FakeScavengePoints {
    async fn latest_scavenge_point(&self) -> Result<Option<ScavengePoint>> {
        Ok(self.db.lock().latest_scavenge_point())
    }

    async fn add_scavenge_point(&self, expected_version: Option<i64>, threshold: i32) -> Result<ScavengePoint> {
        let mut db = self.db.lock();
        let current = db.latest_scavenge_point().map(|sp| sp.event_number);
        if current != expected_version {
            return Err(Error::Collaborator {
                message: format!("expected version {:?} but stream is at {:?}", expected_version, current),
            });
        }
        Ok(db.add_scavenge_point(threshold))
    }
}

pub struct FakeMerger {
    db: SharedDb,
}

#[async_trait]
impl ChunkMergerBackend for FakeMerger {
    async fn merge_chunks(
        &self,
        _scavenge_point: &ScavengePoint,
        _log: &dyn ScavengerLog,
        cancel: &Cancellation,
    ) -> Result<()> {
        cancel.check()?;
        self.db.lock().merges += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeArchive {
    position: AtomicU64,
    pub queries: AtomicUsize,
}

impl FakeArchive {
    pub fn set(&self, position: u64) {
        self.position.store(position, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArchiveCheckpoint for FakeArchive {
    async fn is_greater_than_or_equal_to(&self, position: u64) -> Result<bool> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.position.load(Ordering::SeqCst) >= position)
    }
}

pub struct FakeRemoteSwitch {
    db: SharedDb,
}

#[async_trait]
impl ChunkManagerForChunkRemover for FakeRemoteSwitch {
    async fn switch_in_chunks(&self, locators: Vec<String>) -> Result<bool> {
        let mut db = self.db.lock();
        for locator in locators {
            let number: usize = locator
                .rsplit('-')
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| Error::invariant(format!("bad locator {}", locator)))?;
            match db.chunks.get_mut(number) {
                Some(chunk) => chunk.remote = true,
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub db: SharedDb,
    pub archive: Arc<FakeArchive>,
}

impl Harness {
    pub fn new(db: LogDb) -> Self {
        Self {
            db: db.shared(),
            archive: Arc::new(FakeArchive::default()),
        }
    }

    pub fn log(&self) -> Arc<FakeLog> {
        Arc::new(FakeLog {
            db: Arc::clone(&self.db),
        })
    }

    pub fn index(&self) -> Arc<FakeIndex> {
        Arc::new(FakeIndex {
            db: Arc::clone(&self.db),
        })
    }

    pub fn collaborators(&self) -> ScavengerCollaborators {
        let log = self.log();
        let index = self.index();
        ScavengerCollaborators {
            chunk_reader_for_accumulator: log.clone(),
            index_reader_for_accumulator: index.clone(),
            index_reader_for_calculator: index.clone(),
            chunk_manager: log.clone(),
            chunk_merger: Arc::new(FakeMerger {
                db: Arc::clone(&self.db),
            }),
            index_scavenger: index,
            chunk_reader_for_index_executor: log,
            scavenge_points: Arc::new(FakeScavengePoints {
                db: Arc::clone(&self.db),
            }),
            metastream_lookup: Arc::new(DollarMetastreamLookup),
            archive_checkpoint: Some(self.archive.clone()),
            chunk_manager_for_remover: Some(Arc::new(FakeRemoteSwitch {
                db: Arc::clone(&self.db),
            })),
        }
    }

    pub fn scavenger<S: ScavengeState + ?Sized>(&self, config: ScavengeConfig, state: Arc<S>) -> Scavenger<S> {
        Scavenger::new(config, state, self.collaborators()).unwrap()
    }
}

pub fn test_config() -> ScavengeConfig {
    ScavengeConfig {
        chunk_size: CHUNK_SIZE,
        cancellation_check_period: 4,
        calculator_batch_size: 2,
        index_read_page_size: 3,
        minimum_rest: Duration::from_millis(1),
        ..Default::default()
    }
}

pub fn memory_state(config: &ScavengeConfig) -> Arc<ScavengeStateStore> {
    Arc::new(ScavengeStateStore::in_memory(Arc::new(TestHasher), config))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Crashing state
// =============================================================================

/// Delegates to a store and fails the checkpoint write numbered
/// `crash_at` and every one after it. A failed commit loses its
/// transaction, as a process crash would.
pub struct CrashingState {
    pub inner: ScavengeStateStore,
    crash_at: usize,
    writes: AtomicUsize,
}

impl CrashingState {
    pub fn new(inner: ScavengeStateStore, crash_at: usize) -> Self {
        Self {
            inner,
            crash_at,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn checkpoint_write(&self) -> Result<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if n >= self.crash_at {
            Err(Error::Internal {
                message: format!("simulated crash at checkpoint write {}", n),
            })
        } else {
            Ok(())
        }
    }
}

impl TransactionalState for CrashingState {
    fn begin_transaction(&self) -> Result<()> {
        self.inner.begin_transaction()
    }

    fn commit_transaction(&self, checkpoint: ScavengeCheckpoint) -> Result<()> {
        if let Err(e) = self.checkpoint_write() {
            self.inner.rollback_transaction()?;
            return Err(e);
        }
        self.inner.commit_transaction(checkpoint)
    }

    fn rollback_transaction(&self) -> Result<()> {
        self.inner.rollback_transaction()
    }

    fn set_checkpoint(&self, checkpoint: ScavengeCheckpoint) -> Result<()> {
        self.checkpoint_write()?;
        self.inner.set_checkpoint(checkpoint)
    }
}

impl IncreaseChunkWeights for CrashingState {
    fn increase_chunk_weight(&self, logical_chunk_number: u32, extra_weight: f32) -> Result<()> {
        self.inner.increase_chunk_weight(logical_chunk_number, extra_weight)
    }
}

impl ScavengeStateForAccumulator for CrashingState {
    fn detect_collisions(&self, stream_id: &str) -> Result<()> {
        self.inner.detect_collisions(stream_id)
    }

    fn stream_handle(&self, stream_id: &str) -> StreamHandle {
        self.inner.stream_handle(stream_id)
    }

    fn set_metastream_discard_point(&self, metastream_id: &str, discard_point: DiscardPoint) -> Result<()> {
        self.inner.set_metastream_discard_point(metastream_id, discard_point)
    }

    fn set_metastream_tombstone(&self, metastream_id: &str) -> Result<()> {
        self.inner.set_metastream_tombstone(metastream_id)
    }

    fn set_original_stream_metadata(&self, original_stream_id: &str, metadata: &StreamMetadata) -> Result<()> {
        self.inner.set_original_stream_metadata(original_stream_id, metadata)
    }

    fn set_original_stream_tombstone(&self, original_stream_id: &str) -> Result<()> {
        self.inner.set_original_stream_tombstone(original_stream_id)
    }

    fn set_chunk_time_stamp_range(&self, logical_chunk_number: u32, range: ChunkTimeStampRange) -> Result<()> {
        self.inner.set_chunk_time_stamp_range(logical_chunk_number, range)
    }
}

impl ScavengeStateForCalculator for CrashingState {
    fn original_streams_to_calculate(
        &self,
        after: Option<&StreamHandle>,
        limit: usize,
    ) -> Result<Vec<(StreamHandle, OriginalStreamData)>> {
        self.inner.original_streams_to_calculate(after, limit)
    }

    fn set_original_stream_discard_points(
        &self,
        handle: &StreamHandle,
        status: CalculationStatus,
        discard_point: DiscardPoint,
        maybe_discard_point: DiscardPoint,
    ) -> Result<()> {
        self.inner
            .set_original_stream_discard_points(handle, status, discard_point, maybe_discard_point)
    }

    fn chunk_time_stamp_range(&self, logical_chunk_number: u32) -> Option<ChunkTimeStampRange> {
        ScavengeStateForCalculator::chunk_time_stamp_range(&self.inner, logical_chunk_number)
    }
}

impl ScavengeStateForChunkExecutor for CrashingState {
    fn borrow_state_for_worker(&self) -> Result<Box<dyn ChunkWorkerState>> {
        self.inner.borrow_state_for_worker()
    }
}

impl ScavengeStateForChunkMerger for CrashingState {}

impl ScavengeStateForIndexExecutor for CrashingState {
    fn is_collision_hash(&self, hash: u64) -> bool {
        self.inner.is_collision_hash(hash)
    }

    fn index_execution_info(&self, handle: &StreamHandle) -> Option<IndexExecutionInfo> {
        self.inner.index_execution_info(handle)
    }
}

impl ScavengeStateForCleaner for CrashingState {
    fn all_chunks_executed(&self) -> bool {
        self.inner.all_chunks_executed()
    }

    fn delete_original_stream_data(&self, delete_archived: bool) -> Result<()> {
        self.inner.delete_original_stream_data(delete_archived)
    }

    fn delete_metastream_data(&self) -> Result<()> {
        self.inner.delete_metastream_data()
    }
}

impl ScavengeState for CrashingState {
    fn checkpoint(&self) -> Option<ScavengeCheckpoint> {
        self.inner.checkpoint()
    }

    fn all_collisions(&self) -> Vec<StreamId> {
        self.inner.all_collisions()
    }

    fn log_stats(&self) {
        self.inner.log_stats()
    }
}
