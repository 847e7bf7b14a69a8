//! # Scavenger
//!
//! Drives one scavenge run. A run either resumes the phase named by the
//! stored checkpoint or starts a new run against the latest scavenge
//! point. Every phase leaves the checkpoint of the next one behind, so the
//! run simply follows the checkpoint until it reads `Done`.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use chunklog_core::{
    metrics::{ScavengeMetrics, Timer},
    state::ScavengeState,
    traits::{
        ArchiveCheckpoint, ChunkManagerForChunkExecutor, ChunkManagerForChunkRemover,
        ChunkMergerBackend, ChunkReaderForAccumulator, ChunkReaderForIndexExecutor,
        IndexReaderForAccumulator, IndexReaderForCalculator, IndexScavenger, ScavengePointSource,
        ScavengerLog,
    },
    logical_chunk_number, Cancellation, Error, MetastreamLookup, Result, ScavengeCheckpoint,
    ScavengeConfig, ScavengePoint, ScavengeResult,
};

use crate::log::TracingScavengerLog;
use crate::stages::{
    Accumulator, Calculator, ChunkDeleter, ChunkExecutor, ChunkMerger, ChunkRemover, Cleaner,
    IndexExecutor, NoopChunkRemover,
};
use crate::throttle::Throttle;

/// External services a scavenger works against.
pub struct ScavengerCollaborators {
    pub chunk_reader_for_accumulator: Arc<dyn ChunkReaderForAccumulator>,
    pub index_reader_for_accumulator: Arc<dyn IndexReaderForAccumulator>,
    pub index_reader_for_calculator: Arc<dyn IndexReaderForCalculator>,
    pub chunk_manager: Arc<dyn ChunkManagerForChunkExecutor>,
    pub chunk_merger: Arc<dyn ChunkMergerBackend>,
    pub index_scavenger: Arc<dyn IndexScavenger>,
    pub chunk_reader_for_index_executor: Arc<dyn ChunkReaderForIndexExecutor>,
    pub scavenge_points: Arc<dyn ScavengePointSource>,
    pub metastream_lookup: Arc<dyn MetastreamLookup>,
    /// Required when retention is enabled.
    pub archive_checkpoint: Option<Arc<dyn ArchiveCheckpoint>>,
    /// Required when retention is enabled.
    pub chunk_manager_for_remover: Option<Arc<dyn ChunkManagerForChunkRemover>>,
}

pub struct Scavenger<S: ScavengeState + ?Sized> {
    config: ScavengeConfig,
    state: Arc<S>,
    scavenge_points: Arc<dyn ScavengePointSource>,
    accumulator: Accumulator,
    calculator: Calculator,
    chunk_executor: ChunkExecutor,
    chunk_merger: ChunkMerger,
    index_executor: IndexExecutor,
    cleaner: Cleaner,
    throttle: Arc<Throttle>,
    metrics: ScavengeMetrics,
}

impl<S: ScavengeState + ?Sized> Scavenger<S> {
    pub fn new(config: ScavengeConfig, state: Arc<S>, collaborators: ScavengerCollaborators) -> Result<Self> {
        config.validate()?;

        let metrics = ScavengeMetrics::new();
        let throttle = Arc::new(Throttle::new(
            config.throttle_percent,
            config.minimum_rest,
            config.rest_logging_threshold,
        ));

        let chunk_remover: Arc<dyn ChunkRemover> = if config.retention.enabled {
            let (Some(archive_checkpoint), Some(chunk_manager)) = (
                collaborators.archive_checkpoint.clone(),
                collaborators.chunk_manager_for_remover.clone(),
            ) else {
                return Err(Error::Configuration {
                    message: "retention is enabled but no archive checkpoint or chunk manager for removal was supplied"
                        .to_string(),
                });
            };
            Arc::new(ChunkDeleter::new(&config.retention, archive_checkpoint, chunk_manager))
        } else {
            Arc::new(NoopChunkRemover)
        };

        let accumulator = Accumulator::new(
            &config,
            collaborators.chunk_reader_for_accumulator,
            collaborators.index_reader_for_accumulator,
            Arc::clone(&collaborators.metastream_lookup),
            Arc::clone(&throttle),
            metrics.clone(),
        );
        let calculator = Calculator::new(
            &config,
            collaborators.index_reader_for_calculator,
            Arc::clone(&throttle),
            metrics.clone(),
        );
        let chunk_executor = ChunkExecutor::new(
            &config,
            collaborators.chunk_manager,
            chunk_remover,
            collaborators.metastream_lookup,
            Arc::clone(&throttle),
        );
        let chunk_merger = ChunkMerger::new(config.merge_chunks, collaborators.chunk_merger);
        let index_executor = IndexExecutor::new(
            collaborators.index_scavenger,
            collaborators.chunk_reader_for_index_executor,
        );
        let cleaner = Cleaner::new(config.unsafe_ignore_hard_deletes);

        Ok(Self {
            config,
            state,
            scavenge_points: collaborators.scavenge_points,
            accumulator,
            calculator,
            chunk_executor,
            chunk_merger,
            index_executor,
            cleaner,
            throttle,
            metrics,
        })
    }

    pub fn metrics(&self) -> &ScavengeMetrics {
        &self.metrics
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// Run a scavenge, reporting progress through `tracing`.
    pub async fn scavenge(&self, cancel: &Cancellation) -> ScavengeResult {
        let log: Arc<dyn ScavengerLog> = Arc::new(TracingScavengerLog::new(self.metrics.clone()));
        self.scavenge_with_log(log, cancel).await
    }

    pub async fn scavenge_with_log(&self, log: Arc<dyn ScavengerLog>, cancel: &Cancellation) -> ScavengeResult {
        let started = Instant::now();
        log.scavenge_started();

        let (result, message) = match self.run(&log, cancel).await {
            Ok(()) => (ScavengeResult::Success, None),
            Err(Error::Cancelled) => {
                info!("SCAVENGING: Scavenge stopped");
                (ScavengeResult::Stopped, None)
            }
            Err(e) => {
                error!("SCAVENGING: Scavenge failed ({}): {}", e.error_code(), e);
                (ScavengeResult::Errored, Some(e.to_string()))
            }
        };

        if self.throttle.is_throttled() {
            info!("SCAVENGING: {}", self.throttle.pretty_stats());
        }
        log.scavenge_completed(result, message.as_deref(), started.elapsed());
        result
    }

    async fn run(&self, log: &Arc<dyn ScavengerLog>, cancel: &Cancellation) -> Result<()> {
        self.log_collisions();
        self.state.log_stats();

        match self.state.checkpoint() {
            None => {
                info!("SCAVENGING: Started a new scavenge with no checkpoint");
                self.start_new(None, cancel).await?;
            }
            Some(ScavengeCheckpoint::Done { scavenge_point }) => {
                info!("SCAVENGING: Started a new scavenge after {}", scavenge_point);
                self.start_new(Some(scavenge_point), cancel).await?;
            }
            Some(checkpoint) => {
                info!("SCAVENGING: Resuming scavenge from checkpoint {}", checkpoint);
            }
        }

        self.run_from_checkpoint(log, cancel).await?;
        self.log_collisions();
        Ok(())
    }

    /// Pick the scavenge point for a new run and store the initial
    /// accumulation checkpoint. Leaves the checkpoint untouched when there
    /// is nothing to do.
    async fn start_new(&self, previous: Option<ScavengePoint>, cancel: &Cancellation) -> Result<()> {
        cancel.check()?;
        let latest = self.scavenge_points.latest_scavenge_point().await?;

        let scavenge_point = match (latest, previous.as_ref()) {
            (Some(latest), Some(previous)) if latest.event_number <= previous.event_number => {
                if self.config.sync_only {
                    info!("SCAVENGING: No scavenge point newer than {}, nothing to sync", previous);
                    return Ok(());
                }
                self.scavenge_points
                    .add_scavenge_point(Some(latest.event_number), self.config.threshold_for_new_scavenge)
                    .await?
            }
            (Some(latest), _) => latest,
            (None, _) => {
                if self.config.sync_only {
                    info!("SCAVENGING: No scavenge point exists, nothing to sync");
                    return Ok(());
                }
                self.scavenge_points
                    .add_scavenge_point(None, self.config.threshold_for_new_scavenge)
                    .await?
            }
        };
        info!("SCAVENGING: Scavenging up to {}", scavenge_point);

        // a scavenge point closes its chunk and accumulation runs up to and
        // including it, so the previous point's chunk is already done
        let done_logical_chunk_number = previous
            .as_ref()
            .map(|p| logical_chunk_number(p.position, self.config.chunk_size));

        self.state.set_checkpoint(ScavengeCheckpoint::Accumulating {
            scavenge_point,
            done_logical_chunk_number,
        })
    }

    async fn run_from_checkpoint(&self, log: &Arc<dyn ScavengerLog>, cancel: &Cancellation) -> Result<()> {
        let state = self.state.as_ref();

        loop {
            let Some(checkpoint) = state.checkpoint() else {
                // start_new found nothing to scavenge
                debug!("SCAVENGING: No checkpoint to run from");
                return Ok(());
            };
            let timer = Timer::new(checkpoint.phase_name());

            match checkpoint {
                ScavengeCheckpoint::Accumulating {
                    scavenge_point,
                    done_logical_chunk_number,
                } => {
                    self.accumulator
                        .accumulate(&scavenge_point, done_logical_chunk_number, state, cancel)
                        .await?
                }
                ScavengeCheckpoint::Calculating {
                    scavenge_point,
                    done_stream_handle,
                } => {
                    self.calculator
                        .calculate(&scavenge_point, done_stream_handle, state, cancel)
                        .await?
                }
                ScavengeCheckpoint::ExecutingChunks {
                    scavenge_point,
                    done_logical_chunk_number,
                } => {
                    self.chunk_executor
                        .execute(&scavenge_point, done_logical_chunk_number, state, Arc::clone(log), cancel)
                        .await?
                }
                ScavengeCheckpoint::MergingChunks { scavenge_point } => {
                    self.chunk_merger
                        .merge(&scavenge_point, state, log.as_ref(), cancel)
                        .await?
                }
                ScavengeCheckpoint::ExecutingIndex { scavenge_point } => {
                    self.index_executor
                        .execute(&scavenge_point, state, log.as_ref(), cancel)
                        .await?
                }
                ScavengeCheckpoint::Cleaning { scavenge_point } => {
                    self.cleaner.clean(&scavenge_point, state, cancel).await?
                }
                ScavengeCheckpoint::Done { scavenge_point } => {
                    info!("SCAVENGING: Completed {}", scavenge_point);
                    return Ok(());
                }
            }

            let name = timer.name().to_string();
            let elapsed = timer.stop();
            info!(
                "SCAVENGING: {} phase took {}",
                name,
                chunklog_core::utils::format_duration(elapsed)
            );
        }
    }

    fn log_collisions(&self) {
        let collisions = self.state.all_collisions();
        self.metrics.update_collisions(collisions.len() as u64);
        if collisions.is_empty() {
            debug!("SCAVENGING: No stream collisions");
        } else {
            info!(
                "SCAVENGING: {} colliding stream(s): {}",
                collisions.len(),
                collisions.join(", ")
            );
        }
    }
}
