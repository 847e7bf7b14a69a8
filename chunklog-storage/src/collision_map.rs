//! Map keyed by stream handle.
//!
//! Values of non-colliding streams live under their hash. Once a stream is
//! known to collide its value moves under its id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

use chunklog_core::{StreamHandle, StreamId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionMap<V> {
    by_hash: BTreeMap<u64, V>,
    by_id: BTreeMap<StreamId, V>,
}

impl<V> Default for CollisionMap<V> {
    fn default() -> Self {
        Self {
            by_hash: BTreeMap::new(),
            by_id: BTreeMap::new(),
        }
    }
}

impl<V: Clone> CollisionMap<V> {
    pub fn get(&self, handle: &StreamHandle) -> Option<&V> {
        match handle {
            StreamHandle::Hash(h) => self.by_hash.get(h),
            StreamHandle::Id(id) => self.by_id.get(id),
        }
    }

    /// Set or remove the value for `handle`, returning the previous value.
    pub fn set(&mut self, handle: &StreamHandle, value: Option<V>) -> Option<V> {
        match (handle, value) {
            (StreamHandle::Hash(h), Some(v)) => self.by_hash.insert(*h, v),
            (StreamHandle::Hash(h), None) => self.by_hash.remove(h),
            (StreamHandle::Id(id), Some(v)) => self.by_id.insert(id.clone(), v),
            (StreamHandle::Id(id), None) => self.by_id.remove(id),
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len() + self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries strictly after `after` in handle order: hashes first, then ids.
    pub fn entries_after<'a>(
        &'a self,
        after: Option<&StreamHandle>,
    ) -> Box<dyn Iterator<Item = (StreamHandle, &'a V)> + 'a> {
        let hashes = self
            .by_hash
            .iter()
            .map(|(h, v)| (StreamHandle::Hash(*h), v));
        let ids = |lower: Bound<&StreamId>| {
            self.by_id
                .range::<StreamId, _>((lower, Bound::Unbounded))
                .map(|(id, v)| (StreamHandle::Id(id.clone()), v))
        };

        match after {
            None => Box::new(hashes.chain(ids(Bound::Unbounded))),
            Some(StreamHandle::Hash(after_hash)) => {
                let after_hash = *after_hash;
                Box::new(
                    self.by_hash
                        .range((Bound::Excluded(after_hash), Bound::Unbounded))
                        .map(|(h, v)| (StreamHandle::Hash(*h), v))
                        .chain(ids(Bound::Unbounded)),
                )
            }
            Some(StreamHandle::Id(after_id)) => Box::new(ids(Bound::Excluded(after_id))),
        }
    }

    pub fn handles(&self) -> Vec<StreamHandle> {
        self.entries_after(None).map(|(h, _)| h).collect()
    }
}
