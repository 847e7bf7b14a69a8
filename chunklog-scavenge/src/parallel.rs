//! Bounded parallel processing with a trailing checkpoint.
//!
//! Items are started in order and may finish in any order. The checkpoint
//! only ever reports the last item of the completed prefix, so resuming
//! from it never skips unfinished work.
//!
//! ```text
//!   started:   1   2   3   4   5
//!   finished:  ✓   ✓   .   ✓   .
//!                  ▲
//!              watermark (item 2)
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::warn;

use chunklog_core::{Cancellation, Error, Result};

/// Tracks in-flight items and the checkpoint of the completed prefix.
pub struct TrailingWatermark<C> {
    next_seq: u64,
    in_flight: BTreeMap<u64, (bool, C)>,
}

impl<C> Default for TrailingWatermark<C> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            in_flight: BTreeMap::new(),
        }
    }
}

impl<C> TrailingWatermark<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item whose completion makes `checkpoint` valid.
    pub fn start(&mut self, checkpoint: C) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(seq, (false, checkpoint));
        seq
    }

    /// Mark `seq` done. Returns the new watermark if it advanced.
    pub fn complete(&mut self, seq: u64) -> Option<C> {
        if let Some(entry) = self.in_flight.get_mut(&seq) {
            entry.0 = true;
        }

        let mut advanced = None;
        while let Some(entry) = self.in_flight.first_entry() {
            if !entry.get().0 {
                break;
            }
            advanced = Some(entry.remove().1);
        }
        advanced
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Run `process` over `source` with one task per slot.
///
/// Each slot is moved into the task that uses it and handed back on
/// completion. `emit` receives every watermark advance. The first error
/// stops new work; tasks already running are drained before it is returned.
pub async fn run_with_trailing_checkpoint<T, S, C, I, K, P, Fut, E>(
    source: I,
    mut slots: Vec<S>,
    checkpoint_of: K,
    process: P,
    mut emit: E,
    cancel: &Cancellation,
) -> Result<Vec<S>>
where
    I: IntoIterator<Item = Result<T>>,
    T: Send + 'static,
    S: Send + 'static,
    K: Fn(&T) -> C,
    P: Fn(S, T) -> Fut,
    Fut: Future<Output = (S, Result<()>)> + Send + 'static,
    E: FnMut(C) -> Result<()>,
{
    if slots.is_empty() {
        return Err(Error::invariant("parallel loop needs at least one slot"));
    }

    let mut source = source.into_iter().fuse();
    let mut watermark = TrailingWatermark::new();
    let mut tasks: JoinSet<(u64, S, Result<()>)> = JoinSet::new();
    let mut failure: Option<Error> = None;

    loop {
        while failure.is_none() && !slots.is_empty() {
            if let Err(e) = cancel.check() {
                failure = Some(e);
                break;
            }
            let item = match source.next() {
                None => break,
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                Some(Ok(item)) => item,
            };
            let Some(slot) = slots.pop() else { break };
            let seq = watermark.start(checkpoint_of(&item));
            let work = process(slot, item);
            tasks.spawn(async move {
                let (slot, result) = work.await;
                (seq, slot, result)
            });
        }

        match tasks.join_next().await {
            None => break,
            Some(Ok((seq, slot, result))) => {
                slots.push(slot);
                match result {
                    Ok(()) if failure.is_none() => {
                        if let Some(checkpoint) = watermark.complete(seq) {
                            if let Err(e) = emit(checkpoint) {
                                failure = Some(e);
                            }
                        }
                    }
                    Ok(()) => {}
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(e);
                        } else {
                            warn!("SCAVENGING: Further worker error while stopping: {}", e);
                        }
                    }
                }
            }
            Some(Err(join_error)) => {
                warn!("SCAVENGING: Worker task failed: {}", join_error);
                failure.get_or_insert(Error::Internal {
                    message: format!("worker task failed: {}", join_error),
                });
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(slots),
    }
}
