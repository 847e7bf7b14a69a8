//! # Chunk Log Scavenge State Storage
//!
//! Durable, transactional store behind every scavenge state port.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Write Path                            │
//! │                                                              │
//! │  Port call ──> CollisionDetector ──> StateMutation           │
//! │                                          │                   │
//! │                                          ▼                   │
//! │                       StateTables <── apply (inverse kept)   │
//! │                                          │                   │
//! │                                     commit_transaction       │
//! │                                          ▼                   │
//! │                              WAL Batch (MessagePack)         │
//! └──────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Recovery Path                          │
//! │                                                              │
//! │  WAL files ──> newest Snapshot ──> later Batches ──> Tables  │
//! │                                                   │          │
//! │                                                   ▼          │
//! │                                          compact to Snapshot │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod collision;
pub mod collision_map;
pub mod state;
pub mod tables;
pub mod wal;

pub use collision::{CollisionDetector, CollisionOutcome};
pub use collision_map::CollisionMap;
pub use state::ScavengeStateStore;
pub use tables::{StateMutation, StateTables};
pub use wal::{StateWal, WalConfig, WalRecord};
