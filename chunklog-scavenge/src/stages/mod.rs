//! The six checkpointed phases of a scavenge, plus chunk removal.

pub mod accumulator;
pub mod calculator;
pub mod chunk_executor;
pub mod chunk_merger;
pub mod chunk_remover;
pub mod cleaner;
pub mod index_executor;

pub use accumulator::Accumulator;
pub use calculator::Calculator;
pub use chunk_executor::{ChunkExecutionWorker, ChunkExecutor};
pub use chunk_merger::ChunkMerger;
pub use chunk_remover::{archived_chunk_locator, ChunkDeleter, ChunkRemover, NoopChunkRemover};
pub use cleaner::Cleaner;
pub use index_executor::IndexExecutor;
