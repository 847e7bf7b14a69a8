//! # Configuration Management
//!
//! Handles configuration for a scavenge run and for the scavenge-state store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub const MAX_THREADS: usize = 4;

/// Main scavenge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScavengeConfig {
    /// Size in bytes of one logical chunk.
    pub chunk_size: u64,
    pub threads: usize,
    /// Hot loops check for cancellation every this many iterations.
    pub cancellation_check_period: usize,
    /// Percentage of wall time spent working, 1..=100.
    pub throttle_percent: u32,
    pub minimum_rest: Duration,
    pub rest_logging_threshold: Duration,
    pub unsafe_ignore_hard_deletes: bool,
    pub merge_chunks: bool,
    /// Streams calculated per transaction.
    pub calculator_batch_size: usize,
    pub index_read_page_size: usize,
    pub metadata_ordering_window: usize,
    pub hash_users_cache_capacity: usize,
    pub threshold_for_new_scavenge: i32,
    /// Only scavenge up to existing scavenge points, never create one.
    pub sync_only: bool,
    pub retention: RetentionConfig,
    pub state: StateConfig,
}

impl Default for ScavengeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024 * 1024, // 256MB
            threads: 1,
            cancellation_check_period: 1024,
            throttle_percent: 100,
            minimum_rest: Duration::from_millis(1000),
            rest_logging_threshold: Duration::from_millis(10_000),
            unsafe_ignore_hard_deletes: false,
            merge_chunks: true,
            calculator_batch_size: 1000,
            index_read_page_size: 100,
            metadata_ordering_window: 100,
            hash_users_cache_capacity: 100_000,
            threshold_for_new_scavenge: 0,
            sync_only: false,
            retention: RetentionConfig::default(),
            state: StateConfig::default(),
        }
    }
}

impl ScavengeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration {
                message: "chunk_size must be positive".to_string(),
            });
        }
        if self.cancellation_check_period == 0
            || self.calculator_batch_size == 0
            || self.index_read_page_size == 0
        {
            return Err(Error::Configuration {
                message: "cancellation_check_period, calculator_batch_size and index_read_page_size must be positive"
                    .to_string(),
            });
        }
        if self.throttle_percent == 0 || self.throttle_percent > 100 {
            return Err(Error::Configuration {
                message: format!("throttle_percent must be in 1..=100, got {}", self.throttle_percent),
            });
        }
        if self.threads > 1 && self.throttle_percent != 100 {
            return Err(Error::Configuration {
                message: "a multi-threaded scavenge cannot be throttled".to_string(),
            });
        }
        Ok(())
    }

    /// Worker count clamped to the supported range.
    pub fn effective_threads(&self) -> usize {
        if self.threads < 1 || self.threads > MAX_THREADS {
            tracing::warn!(
                "SCAVENGING: {} threads requested, clamping to 1..={}",
                self.threads,
                MAX_THREADS
            );
        }
        self.threads.clamp(1, MAX_THREADS)
    }
}

/// Local chunk retention when an archive tier holds the data remotely
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub retain_bytes: u64,
    pub retain_period: Duration,
    pub archive_confirmation_retries: u32,
    pub archive_confirmation_delay: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retain_bytes: 1024 * 1024 * 1024,              // 1GB
            retain_period: Duration::from_secs(7 * 86_400), // 7 days
            archive_confirmation_retries: 10,
            archive_confirmation_delay: Duration::from_secs(5),
        }
    }
}

/// Scavenge-state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub data_dir: PathBuf,
    pub wal_max_file_size: u64,
    pub wal_buffer_size: usize,
    pub sync_on_write: bool,
    pub compact_on_open: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/scavenge"),
            wal_max_file_size: 64 * 1024 * 1024, // 64MB
            wal_buffer_size: 64 * 1024,          // 64KB
            sync_on_write: true,
            compact_on_open: true,
        }
    }
}
