use bytes::Bytes;
use chunklog_core::error::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::tables::{StateMutation, StateTables};

pub const WAL_MAGIC: &[u8; 8] = b"CHUNKSCV";
pub const WAL_VERSION: u32 = 1;
pub const WAL_HEADER_SIZE: usize = 64;
pub const ENTRY_HEADER_SIZE: usize = 32;

/// Offset of the last-sequence field in the file header.
pub const LAST_SEQUENCE_OFFSET: u64 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// Mutations of one committed transaction.
    Batch = 1,

    // Full copy of the state tables. Everything before it is superseded.
    Snapshot = 2,
}

impl TryFrom<u8> for EntryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EntryType::Batch),
            2 => Ok(EntryType::Snapshot),
            _ => Err(Error::WriteAheadLog {
                message: format!("Invalid entry type: {}", value),
                source: None,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalEntry {
    pub sequence: u64,
    pub timestamp: u64,
    pub entry_type: EntryType,
    pub data: Bytes,
}

/// Decoded payload of a WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    Batch(Vec<StateMutation>),
    Snapshot(Box<StateTables>),
}

impl WalRecord {
    pub fn entry_type(&self) -> EntryType {
        match self {
            WalRecord::Batch(_) => EntryType::Batch,
            WalRecord::Snapshot(_) => EntryType::Snapshot,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let data = rmp_serde::to_vec(self).map_err(|e| Error::WriteAheadLog {
            message: "Serialization failed".to_string(),
            source: Some(Box::new(e)),
        })?;
        Ok(Bytes::from(data))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(|e| Error::WriteAheadLog {
            message: "Deserialization failed".to_string(),
            source: Some(Box::new(e)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WalConfig {
    pub max_file_size: u64,
    pub sync_on_write: bool,
    pub buffer_size: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024 * 1024, // 64MB
            sync_on_write: true,
            buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl From<&chunklog_core::StateConfig> for WalConfig {
    fn from(config: &chunklog_core::StateConfig) -> Self {
        Self {
            max_file_size: config.wal_max_file_size,
            sync_on_write: config.sync_on_write,
            buffer_size: config.wal_buffer_size,
        }
    }
}
