//! # Chunk Log Scavenger
//!
//! Crash-resumable scavenging of a chunked transaction log with a hash
//! index. A run is bounded by a scavenge point and moves through six
//! phases, each persisting a checkpoint so that an interrupted run resumes
//! where it stopped.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌───────────────┐
//! │ Accumulator │──>│ Calculator │──>│ ChunkExecutor │──┐
//! │ per chunk   │   │ per batch  │   │ N workers     │  │
//! └─────────────┘   └────────────┘   └───────────────┘  │
//!                                                       │
//!   ┌───────────────────────────────────────────────────┘
//!   │
//!   ▼
//! ┌─────────────┐   ┌───────────────┐   ┌─────────┐   ┌──────┐
//! │ ChunkMerger │──>│ IndexExecutor │──>│ Cleaner │──>│ Done │
//! └─────────────┘   └───────────────┘   └─────────┘   └──────┘
//! ```
//!
//! The accumulator learns metadata, tombstones and collisions from the log.
//! The calculator turns them into discard points and chunk weights. The
//! executors apply the discard points to chunks and to the index.

pub mod event_calculator;
pub mod log;
pub mod parallel;
pub mod scavenger;
pub mod stages;
pub mod stream_calculator;
pub mod throttle;
pub mod weights;

pub use event_calculator::EventCalculator;
pub use log::TracingScavengerLog;
pub use parallel::{run_with_trailing_checkpoint, TrailingWatermark};
pub use scavenger::{Scavenger, ScavengerCollaborators};
pub use stream_calculator::StreamCalculator;
pub use throttle::Throttle;
pub use weights::WeightAccumulator;
