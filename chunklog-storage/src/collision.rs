//! Stream-hash collision detection.
//!
//! The first stream id seen for a hash becomes that hash's user. When a
//! different id with the same hash turns up, both ids are marked as
//! collisions and any data stored under the hash moves under the id of its
//! original owner.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chunklog_core::{StreamHandle, StreamHasher, StreamId};

use crate::tables::{StateMutation, StateTables};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionOutcome {
    NoCollision,
    NewCollision { existing: StreamId },
}

pub struct CollisionDetector {
    hasher: Arc<dyn StreamHasher>,
    // ids already known to be a hash user or a collision
    seen: LruCache<StreamId, ()>,
}

impl CollisionDetector {
    pub fn new(hasher: Arc<dyn StreamHasher>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            hasher,
            seen: LruCache::new(capacity),
        }
    }

    pub fn hash(&self, stream_id: &str) -> u64 {
        self.hasher.hash(stream_id)
    }

    /// Decide what must change in `tables` to register `stream_id`.
    pub fn detect(&mut self, stream_id: &str, tables: &StateTables) -> (CollisionOutcome, Vec<StateMutation>) {
        if self.seen.get(stream_id).is_some() {
            return (CollisionOutcome::NoCollision, Vec::new());
        }

        if tables.collisions.contains(stream_id) {
            self.seen.put(stream_id.to_string(), ());
            return (CollisionOutcome::NoCollision, Vec::new());
        }

        let hash = self.hash(stream_id);
        let mut mutations = Vec::new();

        let outcome = match tables.hash_users.get(&hash) {
            None => {
                mutations.push(StateMutation::HashUser {
                    hash,
                    user: Some(stream_id.to_string()),
                });
                CollisionOutcome::NoCollision
            }
            Some(user) if user == stream_id => CollisionOutcome::NoCollision,
            Some(user) => {
                mutations.push(StateMutation::Collision {
                    stream_id: stream_id.to_string(),
                    present: true,
                });

                if !tables.collisions.contains(user) {
                    mutations.push(StateMutation::Collision {
                        stream_id: user.clone(),
                        present: true,
                    });
                    mutations.extend(migrate_to_id(tables, hash, user));
                }

                CollisionOutcome::NewCollision { existing: user.clone() }
            }
        };

        self.seen.put(stream_id.to_string(), ());
        (outcome, mutations)
    }

    /// Forget cached decisions, e.g. after a rollback undid them.
    pub fn clear_cache(&mut self) {
        self.seen.clear();
    }
}

fn migrate_to_id(tables: &StateTables, hash: u64, user: &str) -> Vec<StateMutation> {
    let from = StreamHandle::Hash(hash);
    let to = StreamHandle::Id(user.to_string());
    let mut mutations = Vec::new();

    if let Some(data) = tables.original_streams.get(&from) {
        mutations.push(StateMutation::OriginalStream { handle: from.clone(), data: None });
        mutations.push(StateMutation::OriginalStream { handle: to.clone(), data: Some(data.clone()) });
    }

    if let Some(data) = tables.metastreams.get(&from) {
        mutations.push(StateMutation::Metastream { handle: from, data: None });
        mutations.push(StateMutation::Metastream { handle: to, data: Some(*data) });
    }

    mutations
}
