//! Discard points and per-event discard decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Events with a number strictly below the inner value may be discarded.
///
/// `KEEP_ALL` is the bottom of the ordering. Points only ever move forward:
/// callers combine old and new values with [`DiscardPoint::or`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscardPoint(i64);

impl DiscardPoint {
    pub const KEEP_ALL: DiscardPoint = DiscardPoint(0);

    pub fn discard_before(event_number: i64) -> Self {
        DiscardPoint(event_number)
    }

    pub fn discard_including(event_number: i64) -> Self {
        DiscardPoint(event_number.saturating_add(1))
    }

    /// The first event number that is kept.
    pub fn first_event_number_to_keep(&self) -> i64 {
        self.0
    }

    pub fn should_discard(&self, event_number: i64) -> bool {
        event_number < self.0
    }

    /// The more permissive of the two bounds.
    pub fn or(self, other: DiscardPoint) -> DiscardPoint {
        self.max(other)
    }

    pub fn is_keep_all(&self) -> bool {
        *self == Self::KEEP_ALL
    }
}

impl fmt::Display for DiscardPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_keep_all() {
            write!(f, "KeepAll")
        } else {
            write!(f, "DiscardBefore({})", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardDecision {
    Discard,
    /// Depends on the exact record timestamp, resolved during chunk execution.
    MaybeDiscard,
    /// Present in the index but already gone from the chunks.
    AlreadyDiscarded,
    Keep,
}
