use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use tracing::{info, warn};

use chunklog_core::error::{Error, Result};

use super::types::*;

/// In-memory struct of an open WAL file.
pub(crate) struct WalFile {
    pub path: PathBuf,
    pub file: BufWriter<File>,
    pub size: u64,
    pub entry_count: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
}

pub(crate) fn file_name(sequence: u64) -> String {
    format!("{:020}.wal", sequence)
}

pub(crate) fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn unix_now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn create_file(wal_dir: &Path, sequence: u64, config: &WalConfig) -> Result<WalFile> {
    let path = wal_dir.join(file_name(sequence));

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .read(true)
        .open(&path)?;

    let mut writer = BufWriter::with_capacity(config.buffer_size, file);

    writer.write_all(WAL_MAGIC)?;
    writer.write_u32::<LittleEndian>(WAL_VERSION)?;
    writer.write_u64::<LittleEndian>(unix_now_secs())?;
    writer.write_u64::<LittleEndian>(sequence)?; // First sequence
    writer.write_u64::<LittleEndian>(sequence)?; // Last sequence (updated on finalize)
    writer.write_u64::<LittleEndian>(0)?; // Entry count
    writer.write_u32::<LittleEndian>(0)?; // Checksum placeholder
    writer.write_all(&[0u8; 16])?; // Reserved
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(WalFile {
        path,
        file: writer,
        size: WAL_HEADER_SIZE as u64,
        entry_count: 0,
        first_sequence: sequence,
        last_sequence: sequence,
    })
}

fn read_header(reader: &mut impl Read) -> Result<(u64, u64)> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != WAL_MAGIC {
        return Err(Error::WriteAheadLog {
            message: "Invalid WAL file magic number".to_string(),
            source: None,
        });
    }

    let version = reader.read_u32::<LittleEndian>()?;
    if version != WAL_VERSION {
        return Err(Error::WriteAheadLog {
            message: format!("Unsupported WAL version: {}", version),
            source: None,
        });
    }

    let _creation_time = reader.read_u64::<LittleEndian>()?;
    let first_sequence = reader.read_u64::<LittleEndian>()?;
    let _last_sequence = reader.read_u64::<LittleEndian>()?;
    let entry_count = reader.read_u64::<LittleEndian>()?;
    let _checksum = reader.read_u32::<LittleEndian>()?;
    reader.read_exact(&mut [0u8; 16])?;

    Ok((first_sequence, entry_count))
}

/// Read every intact entry of a file. Stops at the first torn or corrupt
/// entry and reports the offset just past the last good one.
pub(crate) fn read_file_entries(path: &Path) -> Result<(Vec<WalEntry>, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_header(&mut reader)?;

    let mut entries = Vec::new();
    let mut good_offset = WAL_HEADER_SIZE as u64;
    loop {
        match read_entry(&mut reader) {
            Ok(entry) => {
                good_offset += entry_size(&entry) as u64;
                entries.push(entry);
            }
            Err(Error::WriteAheadLog { ref message, .. }) if message == "EOF" => break,
            Err(e) => {
                warn!("Stopping WAL replay of {:?} at offset {}: {}", path, good_offset, e);
                break;
            }
        }
    }

    Ok((entries, good_offset))
}

/// Reopen the newest file for appending, cutting off a torn tail.
pub(crate) fn recover_file(path: &Path, config: &WalConfig) -> Result<(WalFile, Vec<WalEntry>)> {
    info!("Recovering from WAL file: {:?}", path);

    let (entries, good_offset) = read_file_entries(path)?;
    let first_sequence = {
        let mut reader = BufReader::new(File::open(path)?);
        read_header(&mut reader)?.0
    };

    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();
    if file_len > good_offset {
        warn!(
            "Truncating torn WAL tail of {:?}: {} bytes",
            path,
            file_len - good_offset
        );
        file.set_len(good_offset)?;
        file.sync_all()?;
    }

    let mut file = file;
    file.seek(SeekFrom::Start(good_offset))?;
    let last_sequence = entries.last().map(|e| e.sequence).unwrap_or(first_sequence);

    Ok((
        WalFile {
            path: path.to_path_buf(),
            file: BufWriter::with_capacity(config.buffer_size, file),
            size: good_offset,
            entry_count: entries.len() as u64,
            first_sequence,
            last_sequence,
        },
        entries,
    ))
}

/// Update header with final sequence/count before rotation.
pub(crate) fn finalize_header(wal_file: &mut WalFile) -> Result<()> {
    wal_file.file.flush()?;
    let file = wal_file.file.get_mut();

    file.seek(SeekFrom::Start(LAST_SEQUENCE_OFFSET))?;
    file.write_u64::<LittleEndian>(wal_file.last_sequence)?;
    file.write_u64::<LittleEndian>(wal_file.entry_count)?;
    file.sync_all()?;
    file.seek(SeekFrom::End(0))?;

    Ok(())
}

pub(crate) fn write_entry(writer: &mut impl Write, entry: &WalEntry) -> Result<()> {
    writer.write_u32::<LittleEndian>(entry.data.len() as u32)?;
    writer.write_u64::<LittleEndian>(entry.sequence)?;
    writer.write_u64::<LittleEndian>(entry.timestamp)?;
    writer.write_u8(entry.entry_type as u8)?;
    writer.write_u8(0)?; // Flags
    writer.write_u32::<LittleEndian>(crc32fast::hash(&entry.data))?;
    writer.write_all(&[0u8; 6])?; // Reserved
    writer.write_all(&entry.data)?;

    Ok(())
}

pub(crate) fn read_entry(reader: &mut impl Read) -> Result<WalEntry> {
    let length = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::WriteAheadLog {
                message: "EOF".to_string(),
                source: Some(Box::new(e)),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let sequence = reader.read_u64::<LittleEndian>()?;
    let timestamp = reader.read_u64::<LittleEndian>()?;
    let entry_type = EntryType::try_from(reader.read_u8()?)?;
    let _flags = reader.read_u8()?;
    let crc = reader.read_u32::<LittleEndian>()?;
    reader.read_exact(&mut [0u8; 6])?;

    let mut data = vec![0u8; length];
    reader.read_exact(&mut data)?;

    if crc32fast::hash(&data) != crc {
        return Err(Error::WriteAheadLog {
            message: "CRC mismatch".to_string(),
            source: None,
        });
    }

    Ok(WalEntry {
        sequence,
        timestamp,
        entry_type,
        data: Bytes::from(data),
    })
}

pub(crate) fn entry_size(entry: &WalEntry) -> usize {
    ENTRY_HEADER_SIZE + entry.data.len()
}
