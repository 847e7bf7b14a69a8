//! Write-ahead log for the scavenge state.
//!
//! Every committed transaction is appended as one `Batch` entry holding its
//! mutations. A `Snapshot` entry holds the full tables and supersedes every
//! entry before it; compaction writes one into a fresh file and deletes the
//! older files.
//!
//! File Format
//! - Header: 64 bytes (magic, version, timestamps, sequence range)
//! - Entries: Header (32B) + Payload (variable, MessagePack)
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WAL File Layout                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Header (64 bytes)                                          │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │ Magic Number (8 bytes): "CHUNKSCV"                  │    │
//! │  │ Version (4 bytes)                                   │    │
//! │  │ Creation Time (8 bytes)                             │    │
//! │  │ First Sequence (8 bytes)                            │    │
//! │  │ Last Sequence (8 bytes)                             │    │
//! │  │ Entry Count (8 bytes)                               │    │
//! │  │ File Checksum (4 bytes)                             │    │
//! │  │ Reserved (16 bytes)                                 │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Entry 1                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │ Entry Header (32 bytes)                             │    │
//! │  │   - Length (4 bytes)                                │    │
//! │  │   - Sequence (8 bytes)                              │    │
//! │  │   - Timestamp (8 bytes)                             │    │
//! │  │   - Entry Type (1 byte)                             │    │
//! │  │   - Flags (1 byte)                                  │    │
//! │  │   - CRC32 (4 bytes)                                 │    │
//! │  │   - Reserved (6 bytes)                              │    │
//! │  ├─────────────────────────────────────────────────────┤    │
//! │  │ Payload (Variable length)                           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Entry 2...N                                                │
//! └─────────────────────────────────────────────────────────────┘

mod file;
mod types;

pub use types::{EntryType, WalConfig, WalEntry, WalRecord};

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use chunklog_core::error::{Error, Result};

use crate::tables::StateTables;
use types::WAL_HEADER_SIZE;
use file::{
    create_file, entry_size, finalize_header, read_file_entries, recover_file, unix_now_millis,
    write_entry, WalFile,
};

pub struct StateWal {
    wal_dir: PathBuf,
    config: WalConfig,
    current: WalFile,
    next_sequence: u64,
}

impl StateWal {
    /// Create or recover a WAL in the given directory. Returns the records
    /// to replay, starting at the newest snapshot.
    pub fn open(wal_dir: impl AsRef<Path>, config: WalConfig) -> Result<(Self, Vec<WalRecord>)> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir).map_err(|e| Error::Io {
            message: format!("Failed to create WAL directory: {:?}", wal_dir),
            source: e,
        })?;

        let wal_files = list_wal_files(&wal_dir)?;
        let mut entries = Vec::new();

        let current = match wal_files.split_last() {
            Some(((sequence, latest), older)) => {
                for (_, path) in older {
                    let (file_entries, _) = read_file_entries(path)?;
                    entries.extend(file_entries);
                }
                if std::fs::metadata(latest)?.len() < WAL_HEADER_SIZE as u64 {
                    // crashed while writing the header
                    warn!("Replacing WAL file with a torn header: {:?}", latest);
                    create_file(&wal_dir, *sequence, &config)?
                } else {
                    let (current, file_entries) = recover_file(latest, &config)?;
                    entries.extend(file_entries);
                    current
                }
            }
            None => create_file(&wal_dir, 0, &config)?,
        };

        let next_sequence = entries
            .last()
            .map(|e| e.sequence + 1)
            .unwrap_or(current.last_sequence.max(current.first_sequence));

        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            let record = WalRecord::decode(&entry.data)?;
            if record.entry_type() != entry.entry_type {
                return Err(Error::WriteAheadLog {
                    message: format!("Entry {} type does not match its payload", entry.sequence),
                    source: None,
                });
            }
            if matches!(record, WalRecord::Snapshot(_)) {
                records.clear();
            }
            records.push(record);
        }

        info!(
            "Opened scavenge state WAL at {:?}: {} records to replay, next sequence {}",
            wal_dir,
            records.len(),
            next_sequence
        );

        Ok((
            Self {
                wal_dir,
                config,
                current,
                next_sequence,
            },
            records,
        ))
    }

    /// Append one record and make it durable according to the config.
    pub fn append(&mut self, record: &WalRecord) -> Result<u64> {
        let entry = WalEntry {
            sequence: self.next_sequence,
            timestamp: unix_now_millis(),
            entry_type: record.entry_type(),
            data: record.encode()?,
        };

        if self.current.entry_count > 0
            && self.current.size + entry_size(&entry) as u64 > self.config.max_file_size
        {
            self.rotate()?;
        }

        write_entry(&mut self.current.file, &entry)?;
        self.current.size += entry_size(&entry) as u64;
        self.current.entry_count += 1;
        self.current.last_sequence = entry.sequence;
        self.next_sequence += 1;

        self.current.file.flush()?;
        if self.config.sync_on_write {
            self.current.file.get_ref().sync_all()?;
        }
        Ok(entry.sequence)
    }

    /// Replace the whole log with a single snapshot.
    pub fn compact(&mut self, tables: &StateTables) -> Result<()> {
        let old_files = list_wal_files(&self.wal_dir)?;

        finalize_header(&mut self.current)?;
        self.current = create_file(&self.wal_dir, self.next_sequence, &self.config)?;
        self.append(&WalRecord::Snapshot(Box::new(tables.clone())))?;
        self.current.file.get_ref().sync_all()?;

        for (_, path) in old_files {
            if path != self.current.path {
                debug!("Deleting compacted WAL file: {:?}", path);
                std::fs::remove_file(&path)?;
            }
        }
        info!("Compacted scavenge state WAL into {:?}", self.current.path);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.current.file.flush()?;
        self.current.file.get_ref().sync_all()?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.wal_dir
    }

    fn rotate(&mut self) -> Result<()> {
        finalize_header(&mut self.current)?;
        self.current = create_file(&self.wal_dir, self.next_sequence, &self.config)?;
        info!("Rotated scavenge state WAL file, new sequence: {}", self.next_sequence);
        Ok(())
    }
}

fn list_wal_files(wal_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(wal_dir)? {
        let path = entry?.path();
        if path.extension() == Some(std::ffi::OsStr::new("wal")) {
            if let Some(name) = path.file_stem() {
                if let Ok(seq) = name.to_string_lossy().parse::<u64>() {
                    files.push((seq, path));
                }
            }
        }
    }
    files.sort_by_key(|f| f.0);
    Ok(files)
}
