//! In-memory tables of the scavenge state and the mutations applied to them.
//!
//! Every mutation is a "set this key to this value" operation, so applying
//! one returns its exact inverse. Transactions keep the inverses as an undo
//! log and the mutations themselves as the redo batch written to the WAL.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use chunklog_core::{
    ChunkTimeStampRange, MetastreamData, OriginalStreamData, ScavengeCheckpoint, StreamHandle,
    StreamId,
};

use crate::collision_map::CollisionMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateTables {
    /// First stream id seen for each hash.
    pub hash_users: BTreeMap<u64, StreamId>,
    pub collisions: BTreeSet<StreamId>,
    pub original_streams: CollisionMap<OriginalStreamData>,
    pub metastreams: CollisionMap<MetastreamData>,
    pub chunk_time_stamp_ranges: BTreeMap<u32, ChunkTimeStampRange>,
    pub chunk_weights: BTreeMap<u32, f32>,
    pub checkpoint: Option<ScavengeCheckpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateMutation {
    HashUser { hash: u64, user: Option<StreamId> },
    Collision { stream_id: StreamId, present: bool },
    OriginalStream { handle: StreamHandle, data: Option<OriginalStreamData> },
    Metastream { handle: StreamHandle, data: Option<MetastreamData> },
    ChunkTimeStampRange { chunk: u32, range: Option<ChunkTimeStampRange> },
    ChunkWeight { chunk: u32, weight: Option<f32> },
    Checkpoint(Option<ScavengeCheckpoint>),
}

impl StateMutation {
    /// Apply to `tables` and return the mutation that undoes it.
    pub fn apply(&self, tables: &mut StateTables) -> StateMutation {
        match self {
            StateMutation::HashUser { hash, user } => {
                let previous = match user {
                    Some(u) => tables.hash_users.insert(*hash, u.clone()),
                    None => tables.hash_users.remove(hash),
                };
                StateMutation::HashUser { hash: *hash, user: previous }
            }
            StateMutation::Collision { stream_id, present } => {
                let was_present = if *present {
                    !tables.collisions.insert(stream_id.clone())
                } else {
                    tables.collisions.remove(stream_id)
                };
                StateMutation::Collision {
                    stream_id: stream_id.clone(),
                    present: was_present,
                }
            }
            StateMutation::OriginalStream { handle, data } => {
                let previous = tables.original_streams.set(handle, data.clone());
                StateMutation::OriginalStream {
                    handle: handle.clone(),
                    data: previous,
                }
            }
            StateMutation::Metastream { handle, data } => {
                let previous = tables.metastreams.set(handle, *data);
                StateMutation::Metastream {
                    handle: handle.clone(),
                    data: previous,
                }
            }
            StateMutation::ChunkTimeStampRange { chunk, range } => {
                let previous = match range {
                    Some(r) => tables.chunk_time_stamp_ranges.insert(*chunk, *r),
                    None => tables.chunk_time_stamp_ranges.remove(chunk),
                };
                StateMutation::ChunkTimeStampRange { chunk: *chunk, range: previous }
            }
            StateMutation::ChunkWeight { chunk, weight } => {
                let previous = match weight {
                    Some(w) => tables.chunk_weights.insert(*chunk, *w),
                    None => tables.chunk_weights.remove(chunk),
                };
                StateMutation::ChunkWeight { chunk: *chunk, weight: previous }
            }
            StateMutation::Checkpoint(checkpoint) => {
                let previous = std::mem::replace(&mut tables.checkpoint, checkpoint.clone());
                StateMutation::Checkpoint(previous)
            }
        }
    }
}
