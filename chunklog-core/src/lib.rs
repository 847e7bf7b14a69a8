//! # Chunk Log Core
//!
//! Building blocks shared by the scavenger and its state store:
//! - Scavenge data model (scavenge points, discard points, stream facts)
//! - Checkpoints for every scavenge phase
//! - State ports narrowed per phase
//! - Collaborator traits for the log, index and archive
//! - Error types, configuration and metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  chunklog-core                  │
//! ├─────────────────────────────────────────────────┤
//! │  • types        - Records and scavenge points   │
//! │  • discard      - Discard points and decisions  │
//! │  • stream       - Handles and per-stream facts  │
//! │  • checkpoint   - Per-phase resume cursors      │
//! │  • state        - Scavenge state ports          │
//! │  • traits       - Collaborator interfaces       │
//! │  • cancellation - Cooperative cancellation      │
//! │  • error        - Error handling                │
//! │  • config       - Configuration                 │
//! │  • metrics      - Run counters                  │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod discard;
pub mod error;
pub mod metrics;
pub mod state;
pub mod stream;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use cancellation::{Cancellation, CancellationSource};
pub use checkpoint::ScavengeCheckpoint;
pub use config::{RetentionConfig, ScavengeConfig, StateConfig};
pub use discard::{DiscardDecision, DiscardPoint};
pub use error::{Error, Result};
pub use stream::{
    CalculationStatus, ChunkExecutionInfo, Crc32StreamHasher, DollarMetastreamLookup,
    IndexExecutionInfo, MetastreamData, MetastreamLookup, OriginalStreamData, StreamHandle,
    StreamHasher,
};
pub use types::{
    logical_chunk_number, ChunkTimeStampRange, ScavengePoint, ScavengeResult, StreamId,
    StreamMetadata, Timestamp,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
