//! # Scavenge State Store Tests
//!
//! Tests for:
//! - Transactions, commit and rollback
//! - Collision tracking through the accumulator port
//! - Calculator and cleaner views
//! - Durability across reopen

use std::sync::Arc;
use tempfile::TempDir;

use chunklog_core::state::*;
use chunklog_core::{
    CalculationStatus, ChunkTimeStampRange, DiscardPoint, ScavengeCheckpoint, ScavengeConfig,
    ScavengePoint, StreamHandle, StreamHasher, StreamMetadata,
};
use chunklog_storage::ScavengeStateStore;

/// Hashes by first character so collisions are easy to arrange.
struct FirstCharHasher;

impl StreamHasher for FirstCharHasher {
    fn hash(&self, stream_id: &str) -> u64 {
        stream_id.trim_start_matches("$$").bytes().next().unwrap_or(0) as u64
            + if stream_id.starts_with("$$") { 1000 } else { 0 }
    }
}

fn memory_store() -> ScavengeStateStore {
    ScavengeStateStore::in_memory(Arc::new(FirstCharHasher), &ScavengeConfig::default())
}

fn durable_config(dir: &TempDir) -> ScavengeConfig {
    let mut config = ScavengeConfig::default();
    config.state.data_dir = dir.path().to_path_buf();
    config
}

fn scavenge_point() -> ScavengePoint {
    ScavengePoint::new(1000, 0, chrono::Utc::now(), 0)
}

fn max_count(n: i64) -> StreamMetadata {
    StreamMetadata {
        max_count: Some(n),
        ..Default::default()
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[test]
fn test_commit_stores_checkpoint() {
    let store = memory_store();
    let sp = scavenge_point();

    store.begin_transaction().unwrap();
    store.detect_collisions("apple").unwrap();
    store.set_original_stream_metadata("apple", &max_count(3)).unwrap();
    store
        .commit_transaction(ScavengeCheckpoint::Accumulating {
            scavenge_point: sp.clone(),
            done_logical_chunk_number: Some(0),
        })
        .unwrap();

    assert!(!store.is_in_transaction());
    assert_eq!(
        store.checkpoint(),
        Some(ScavengeCheckpoint::Accumulating {
            scavenge_point: sp,
            done_logical_chunk_number: Some(0),
        })
    );
    assert_eq!(store.original_stream_data("apple").unwrap().max_count, Some(3));
}

#[test]
fn test_rollback_undoes_everything() {
    let store = memory_store();

    store.begin_transaction().unwrap();
    store.detect_collisions("apple").unwrap();
    store.set_original_stream_metadata("apple", &max_count(3)).unwrap();
    store.increase_chunk_weight(2, 2.0).unwrap();
    store.rollback_transaction().unwrap();

    assert!(store.original_stream_data("apple").is_none());
    assert_eq!(store.chunk_weight(2), 0.0);
    assert!(store.snapshot().hash_users.is_empty());
    assert!(store.checkpoint().is_none());
}

#[test]
fn test_nested_transaction_is_rejected() {
    let store = memory_store();
    store.begin_transaction().unwrap();
    assert!(store.begin_transaction().is_err());
}

#[test]
fn test_commit_without_transaction_fails() {
    let store = memory_store();
    let result = store.commit_transaction(ScavengeCheckpoint::Done {
        scavenge_point: scavenge_point(),
    });
    assert!(result.is_err());
}

#[test]
fn test_detection_after_rollback_registers_again() {
    let store = memory_store();

    store.begin_transaction().unwrap();
    store.detect_collisions("apple").unwrap();
    store.rollback_transaction().unwrap();

    store.begin_transaction().unwrap();
    store.detect_collisions("apple").unwrap();
    store
        .commit_transaction(ScavengeCheckpoint::Done {
            scavenge_point: scavenge_point(),
        })
        .unwrap();

    assert_eq!(store.snapshot().hash_users.len(), 1);
}

// =============================================================================
// Collisions
// =============================================================================

#[test]
fn test_colliding_streams_get_id_handles() {
    let store = memory_store();

    store.detect_collisions("apple").unwrap();
    store.set_original_stream_metadata("apple", &max_count(1)).unwrap();
    assert_eq!(store.stream_handle("apple"), StreamHandle::Hash(b'a' as u64));

    store.detect_collisions("avocado").unwrap();
    store.set_original_stream_metadata("avocado", &max_count(2)).unwrap();

    assert_eq!(store.stream_handle("apple"), StreamHandle::Id("apple".into()));
    assert_eq!(store.stream_handle("avocado"), StreamHandle::Id("avocado".into()));
    assert_eq!(store.original_stream_data("apple").unwrap().max_count, Some(1));
    assert_eq!(store.original_stream_data("avocado").unwrap().max_count, Some(2));

    assert!(store.is_collision_hash(b'a' as u64));
    assert!(!store.is_collision_hash(b'b' as u64));
    assert_eq!(store.all_collisions(), vec!["apple".to_string(), "avocado".to_string()]);
}

#[test]
fn test_rolled_back_collision_is_forgotten() {
    let store = memory_store();
    store.detect_collisions("apple").unwrap();

    store.begin_transaction().unwrap();
    store.detect_collisions("avocado").unwrap();
    store.rollback_transaction().unwrap();

    assert!(store.all_collisions().is_empty());
    assert!(!store.is_collision_hash(b'a' as u64));
    assert_eq!(store.stream_handle("apple"), StreamHandle::Hash(b'a' as u64));
}

// =============================================================================
// Phase views
// =============================================================================

#[test]
fn test_metastream_discard_point_never_moves_back() {
    let store = memory_store();
    store.detect_collisions("$$apple").unwrap();

    store
        .set_metastream_discard_point("$$apple", DiscardPoint::discard_before(5))
        .unwrap();
    store
        .set_metastream_discard_point("$$apple", DiscardPoint::discard_before(3))
        .unwrap();

    let data = store.metastream_data_of("$$apple").unwrap();
    assert_eq!(data.discard_point, DiscardPoint::discard_before(5));
    assert!(!data.is_tombstoned);

    store.set_metastream_tombstone("$$apple").unwrap();
    assert!(store.metastream_data_of("$$apple").unwrap().is_tombstoned);
}

#[test]
fn test_calculator_sees_only_active_streams_in_order() {
    let store = memory_store();
    for id in ["cherry", "apple", "banana"] {
        store.detect_collisions(id).unwrap();
        store.set_original_stream_metadata(id, &max_count(1)).unwrap();
    }

    let banana = store.stream_handle("banana");
    store
        .set_original_stream_discard_points(
            &banana,
            CalculationStatus::Spent,
            DiscardPoint::KEEP_ALL,
            DiscardPoint::KEEP_ALL,
        )
        .unwrap();

    let batch = store.original_streams_to_calculate(None, 10).unwrap();
    let handles: Vec<_> = batch.into_iter().map(|(h, _)| h).collect();
    assert_eq!(
        handles,
        vec![StreamHandle::Hash(b'a' as u64), StreamHandle::Hash(b'c' as u64)]
    );

    let after_apple = store
        .original_streams_to_calculate(Some(&StreamHandle::Hash(b'a' as u64)), 10)
        .unwrap();
    assert_eq!(after_apple.len(), 1);
}

#[test]
fn test_discard_points_need_existing_stream() {
    let store = memory_store();
    let result = store.set_original_stream_discard_points(
        &StreamHandle::Hash(42),
        CalculationStatus::Active,
        DiscardPoint::KEEP_ALL,
        DiscardPoint::KEEP_ALL,
    );
    assert!(result.is_err());
}

#[test]
fn test_worker_state_resets_weights_in_range() {
    let store = memory_store();
    store.increase_chunk_weight(0, 2.0).unwrap();
    store.increase_chunk_weight(1, 1.0).unwrap();
    store.increase_chunk_weight(1, 2.0).unwrap();
    store.increase_chunk_weight(5, 4.0).unwrap();

    let mut worker = store.borrow_state_for_worker().unwrap();
    assert_eq!(worker.sum_chunk_weights(0, 1), 5.0);

    worker.reset_chunk_weights(0, 1).unwrap();
    assert_eq!(worker.sum_chunk_weights(0, 1), 0.0);
    assert!(!store.all_chunks_executed());

    worker.reset_chunk_weights(5, 5).unwrap();
    assert!(store.all_chunks_executed());
}

#[test]
fn test_worker_state_reads_stream_facts() {
    let store = memory_store();
    store.detect_collisions("apple").unwrap();
    store.set_original_stream_tombstone("apple").unwrap();
    store
        .set_chunk_time_stamp_range(
            3,
            ChunkTimeStampRange::new(chrono::Utc::now(), chrono::Utc::now()),
        )
        .unwrap();

    let worker = store.borrow_state_for_worker().unwrap();
    assert!(worker.chunk_execution_info("apple").unwrap().is_tombstoned);
    assert!(worker.chunk_execution_info("banana").is_none());
    assert!(worker.chunk_time_stamp_range(3).is_some());
    assert!(worker.chunk_time_stamp_range(4).is_none());
}

#[test]
fn test_index_execution_info_prefers_metastream_data() {
    let store = memory_store();
    store.detect_collisions("$$apple").unwrap();
    store.set_metastream_tombstone("$$apple").unwrap();
    store.detect_collisions("apple").unwrap();
    store.set_original_stream_metadata("apple", &max_count(2)).unwrap();

    let meta = store
        .index_execution_info(&store.stream_handle("$$apple"))
        .unwrap();
    assert!(meta.is_metastream);
    assert!(meta.is_tombstoned);

    let original = store.index_execution_info(&store.stream_handle("apple")).unwrap();
    assert!(!original.is_metastream);
    assert!(store.index_execution_info(&StreamHandle::Hash(7)).is_none());
}

#[test]
fn test_cleaner_deletes_spent_and_optionally_archived() {
    let store = memory_store();
    for id in ["apple", "banana", "cherry"] {
        store.detect_collisions(id).unwrap();
        store.set_original_stream_metadata(id, &max_count(1)).unwrap();
    }
    store.detect_collisions("$$apple").unwrap();
    store
        .set_metastream_discard_point("$$apple", DiscardPoint::discard_before(1))
        .unwrap();

    for (id, status) in [
        ("apple", CalculationStatus::Spent),
        ("banana", CalculationStatus::Archived),
    ] {
        let handle = store.stream_handle(id);
        store
            .set_original_stream_discard_points(&handle, status, DiscardPoint::KEEP_ALL, DiscardPoint::KEEP_ALL)
            .unwrap();
    }

    store.delete_metastream_data().unwrap();
    store.delete_original_stream_data(false).unwrap();
    assert!(store.metastream_data_of("$$apple").is_none());
    assert!(store.original_stream_data("apple").is_none());
    assert!(store.original_stream_data("banana").is_some());
    assert!(store.original_stream_data("cherry").is_some());

    store.delete_original_stream_data(true).unwrap();
    assert!(store.original_stream_data("banana").is_none());
    assert!(store.original_stream_data("cherry").is_some());
}

// =============================================================================
// Durability
// =============================================================================

#[test]
fn test_committed_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = durable_config(&temp_dir);
    let sp = scavenge_point();

    {
        let store = ScavengeStateStore::open(Arc::new(FirstCharHasher), &config).unwrap();
        store.begin_transaction().unwrap();
        store.detect_collisions("apple").unwrap();
        store.detect_collisions("avocado").unwrap();
        store.set_original_stream_metadata("avocado", &max_count(4)).unwrap();
        store.increase_chunk_weight(1, 2.0).unwrap();
        store
            .commit_transaction(ScavengeCheckpoint::Accumulating {
                scavenge_point: sp.clone(),
                done_logical_chunk_number: Some(1),
            })
            .unwrap();

        // open transaction at "crash" time is lost
        store.begin_transaction().unwrap();
        store.increase_chunk_weight(2, 2.0).unwrap();
    }

    let store = ScavengeStateStore::open(Arc::new(FirstCharHasher), &config).unwrap();
    assert_eq!(
        store.checkpoint(),
        Some(ScavengeCheckpoint::Accumulating {
            scavenge_point: sp,
            done_logical_chunk_number: Some(1),
        })
    );
    assert_eq!(store.chunk_weight(1), 2.0);
    assert_eq!(store.chunk_weight(2), 0.0);
    assert_eq!(store.original_stream_data("avocado").unwrap().max_count, Some(4));
    assert!(store.is_collision_hash(b'a' as u64));
}

#[test]
fn test_auto_committed_writes_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = durable_config(&temp_dir);

    {
        let store = ScavengeStateStore::open(Arc::new(FirstCharHasher), &config).unwrap();
        store.increase_chunk_weight(0, 2.0).unwrap();
        store.increase_chunk_weight(3, 1.0).unwrap();
        let mut worker = store.borrow_state_for_worker().unwrap();
        worker.reset_chunk_weights(0, 0).unwrap();
        store
            .set_checkpoint(ScavengeCheckpoint::MergingChunks {
                scavenge_point: scavenge_point(),
            })
            .unwrap();
    }

    let store = ScavengeStateStore::open(Arc::new(FirstCharHasher), &config).unwrap();
    assert_eq!(store.chunk_weight(0), 0.0);
    assert_eq!(store.chunk_weight(3), 1.0);
    assert!(matches!(
        store.checkpoint(),
        Some(ScavengeCheckpoint::MergingChunks { .. })
    ));
}

#[test]
fn test_reopen_twice_after_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let config = durable_config(&temp_dir);

    {
        let store = ScavengeStateStore::open(Arc::new(FirstCharHasher), &config).unwrap();
        for chunk in 0..20 {
            store.increase_chunk_weight(chunk, 1.0).unwrap();
        }
    }
    {
        // compacts on open
        let store = ScavengeStateStore::open(Arc::new(FirstCharHasher), &config).unwrap();
        store.increase_chunk_weight(20, 1.0).unwrap();
    }

    let store = ScavengeStateStore::open(Arc::new(FirstCharHasher), &config).unwrap();
    assert_eq!(store.snapshot().chunk_weights.len(), 21);
}
