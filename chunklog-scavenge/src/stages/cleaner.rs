//! Forgets stream bookkeeping once every chunk has been executed.

use tracing::info;

use chunklog_core::{
    state::ScavengeStateForCleaner, Cancellation, Error, Result, ScavengeCheckpoint, ScavengePoint,
};

pub struct Cleaner {
    unsafe_ignore_hard_deletes: bool,
}

impl Cleaner {
    pub fn new(unsafe_ignore_hard_deletes: bool) -> Self {
        Self {
            unsafe_ignore_hard_deletes,
        }
    }

    pub async fn clean<S>(&self, scavenge_point: &ScavengePoint, state: &S, cancel: &Cancellation) -> Result<()>
    where
        S: ScavengeStateForCleaner + ?Sized,
    {
        cancel.check()?;
        let done = ScavengeCheckpoint::Done {
            scavenge_point: scavenge_point.clone(),
        };

        if !state.all_chunks_executed() {
            if self.unsafe_ignore_hard_deletes {
                return Err(Error::invariant(
                    "hard deletes are being ignored but not every chunk has been executed",
                ));
            }
            info!("SCAVENGING: Skipping cleaning, some chunks still carry weight");
            return state.set_checkpoint(done);
        }

        info!("SCAVENGING: Cleaning scavenge state for {}", scavenge_point);
        state.begin_transaction()?;
        let cleaned = state
            .delete_metastream_data()
            .and_then(|_| state.delete_original_stream_data(self.unsafe_ignore_hard_deletes));
        if let Err(e) = cleaned {
            state.rollback_transaction()?;
            return Err(e);
        }
        state.commit_transaction(done)
    }
}
