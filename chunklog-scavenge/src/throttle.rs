//! Cooperative rest between units of work.
//!
//! A throttle at `p` percent sleeps `active * (100 - p) / p` after each
//! stretch of activity so that work takes roughly `p` percent of wall time.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use chunklog_core::{utils::format_duration, Cancellation, Error, Result};

struct ThrottleState {
    active_since: Instant,
    total_active: Duration,
    total_rest: Duration,
    rests: u64,
}

pub struct Throttle {
    active_percent: u32,
    minimum_rest: Duration,
    logging_threshold: Duration,
    state: Mutex<ThrottleState>,
}

impl Throttle {
    pub fn new(active_percent: u32, minimum_rest: Duration, logging_threshold: Duration) -> Self {
        Self {
            active_percent: active_percent.clamp(1, 100),
            minimum_rest,
            logging_threshold,
            state: Mutex::new(ThrottleState {
                active_since: Instant::now(),
                total_active: Duration::ZERO,
                total_rest: Duration::ZERO,
                rests: 0,
            }),
        }
    }

    /// A throttle that never sleeps.
    pub fn unthrottled() -> Self {
        Self::new(100, Duration::ZERO, Duration::MAX)
    }

    pub fn is_throttled(&self) -> bool {
        self.active_percent < 100
    }

    /// Sleep in proportion to the time spent active since the last rest.
    pub async fn rest(&self, cancel: &Cancellation) -> Result<()> {
        if !self.is_throttled() {
            return cancel.check();
        }

        let duration = {
            let mut state = self.state.lock();
            let active = state.active_since.elapsed();
            state.total_active += active;
            self.rest_for(active)
        };

        if duration >= self.logging_threshold {
            info!("SCAVENGING: Resting for {}", format_duration(duration));
        } else {
            debug!("SCAVENGING: Resting for {}", format_duration(duration));
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }

        let mut state = self.state.lock();
        state.total_rest += duration;
        state.rests += 1;
        state.active_since = Instant::now();
        Ok(())
    }

    fn rest_for(&self, active: Duration) -> Duration {
        let p = self.active_percent;
        (active * (100 - p) / p).max(self.minimum_rest)
    }

    /// Number of completed rests.
    pub fn rest_count(&self) -> u64 {
        self.state.lock().rests
    }

    pub fn pretty_stats(&self) -> String {
        let state = self.state.lock();
        let total_active = state.total_active + state.active_since.elapsed();
        format!(
            "active {} rested {} (throttle {}%)",
            format_duration(total_active),
            format_duration(state.total_rest),
            self.active_percent
        )
    }
}
