//! Write-Ahead Log
//!
//! An append-only file of [`WalRecord`]s. Each record holds the commands of
//! one logical mutation (a single write, or every write of one EXEC) plus
//! the clock they were applied under.
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────┬─────┐
//! │ magic (8 B)  │ [len u32 LE][crc32 u32 LE][bincode payload]  │ ... │
//! └──────────────┴──────────────────────────────────────────────┴─────┘
//! ```
//!
//! A crash mid-append leaves a short or mismatching frame at the end.
//! Scanning stops at the first bad frame; [`WalWriter::open`] truncates the
//! file back to the last good one before appending again.

use super::FsyncPolicy;
use crate::commands::Command;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const WAL_MAGIC: &[u8; 8] = b"EMBRWAL1";
const FRAME_HEADER: usize = 8;

/// Frames larger than this are treated as corruption.
const MAX_RECORD_BYTES: usize = 512 * 1024 * 1024;

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    /// Clock the commands were applied under, in unix milliseconds.
    pub time_ms: u64,
    pub commands: Vec<Command>,
}

/// Result of reading a log file front to back.
#[derive(Debug, Default)]
pub struct WalScan {
    pub records: Vec<WalRecord>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
    /// Whether bytes after the valid prefix were discarded.
    pub torn: bool,
}

fn encode_frame(record: &WalRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads every intact record of the log at `path`.
///
/// A missing or empty file scans as empty. A file with the wrong magic is
/// [`EngineError::StorageCorrupt`].
pub fn scan(path: &Path) -> Result<WalScan> {
    let mut buf = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut buf)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WalScan::default()),
        Err(e) => return Err(e.into()),
    }

    if buf.is_empty() {
        return Ok(WalScan::default());
    }
    if buf.len() < WAL_MAGIC.len() || &buf[..WAL_MAGIC.len()] != WAL_MAGIC {
        return Err(EngineError::StorageCorrupt(format!(
            "{} is not a write-ahead log",
            path.display()
        )));
    }

    let mut pos = WAL_MAGIC.len();
    let mut records = Vec::new();

    while pos < buf.len() {
        let Some(header) = buf.get(pos..pos + FRAME_HEADER) else {
            break;
        };
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len > MAX_RECORD_BYTES {
            break;
        }
        let start = pos + FRAME_HEADER;
        let Some(payload) = buf.get(start..start + len) else {
            break;
        };
        if crc32fast::hash(payload) != crc {
            break;
        }
        match bincode::deserialize::<WalRecord>(payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        pos = start + len;
    }

    let torn = pos < buf.len();
    if torn {
        warn!(
            path = %path.display(),
            valid_bytes = pos,
            discarded_bytes = buf.len() - pos,
            "Write-ahead log has a torn or corrupt tail"
        );
    }

    Ok(WalScan {
        records,
        valid_len: pos as u64,
        torn,
    })
}

/// Appends records to the log file.
#[derive(Debug)]
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    policy: FsyncPolicy,
    /// Records written but not yet fsynced.
    pending: usize,
    last_seq: u64,
    /// A torn tail was cut off when the file was opened.
    truncated: bool,
}

impl WalWriter {
    /// Opens (creating if needed) the log at `path`, dropping any torn tail.
    pub fn open(path: impl Into<PathBuf>, policy: FsyncPolicy) -> Result<Self> {
        let path = path.into();
        let scan = scan(&path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        if scan.valid_len == 0 {
            file.set_len(0)?;
            file.write_all(WAL_MAGIC)?;
            file.sync_data()?;
        } else if scan.torn {
            file.set_len(scan.valid_len)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::End(0))?;

        let last_seq = scan.records.last().map_or(0, |r| r.seq);
        debug!(
            path = %path.display(),
            records = scan.records.len(),
            last_seq = last_seq,
            "Write-ahead log opened"
        );

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            policy,
            pending: 0,
            last_seq,
            truncated: scan.torn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`WalWriter::open`] had to drop a torn tail.
    pub fn truncated_on_open(&self) -> bool {
        self.truncated
    }

    /// Sequence number of the newest record appended or found on open.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Makes the next record's sequence number at least `seq + 1`.
    pub fn advance_seq(&mut self, seq: u64) {
        self.last_seq = self.last_seq.max(seq);
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Appends one record, syncing according to the fsync policy.
    ///
    /// The sequence number is consumed as soon as the frame is buffered.
    /// If the sync that follows fails, the frame stays in the buffer and
    /// reaches the file with the next successful flush, so an `Err` here
    /// does not mean the record is lost and its number is never reused.
    ///
    /// # Returns
    ///
    /// The sequence number assigned to the record.
    pub fn append(&mut self, time_ms: u64, commands: Vec<Command>) -> Result<u64> {
        let record = WalRecord {
            seq: self.last_seq + 1,
            time_ms,
            commands,
        };
        let frame = encode_frame(&record)?;
        self.writer.write_all(&frame)?;
        self.last_seq = record.seq;
        self.pending += 1;

        match self.policy {
            FsyncPolicy::Always => self.flush()?,
            FsyncPolicy::Batched { max_pending } if self.pending >= max_pending.max(1) => {
                self.flush()?
            }
            FsyncPolicy::Batched { .. } => {}
        }
        Ok(record.seq)
    }

    /// Flushes buffered frames and fsyncs the file.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.pending = 0;
        Ok(())
    }

    /// Rewrites the log keeping only records newer than `after_seq`.
    ///
    /// The new file is built beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log.
    ///
    /// # Returns
    ///
    /// The number of records kept.
    pub fn compact(&mut self, after_seq: u64) -> Result<usize> {
        self.flush()?;
        let scan = scan(&self.path)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(WAL_MAGIC)?;
        let mut kept = 0;
        for record in scan.records.iter().filter(|r| r.seq > after_seq) {
            tmp.write_all(&encode_frame(record)?)?;
            kept += 1;
        }
        tmp.as_file().sync_data()?;
        tmp.persist(&self.path).map_err(|e| EngineError::StorageIo(e.error))?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.writer = BufWriter::new(file);

        debug!(
            path = %self.path.display(),
            kept = kept,
            dropped = scan.records.len() - kept,
            "Write-ahead log compacted"
        );
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn set(key: &str, value: &str) -> Command {
        Command::parse("SET", &[Bytes::from(key.to_string()), Bytes::from(value.to_string())])
            .unwrap()
    }

    #[test]
    fn test_sequence_is_consumed_when_buffered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let mut wal = WalWriter::open(&path, FsyncPolicy::Batched { max_pending: 10 }).unwrap();
        assert_eq!(wal.append(10, vec![set("a", "1")]).unwrap(), 1);
        assert_eq!(wal.append(20, vec![set("b", "2")]).unwrap(), 2);
        assert_eq!(wal.last_seq(), 2);
        assert_eq!(wal.pending(), 2);
        assert!(scan(&path).unwrap().records.is_empty());

        wal.flush().unwrap();
        assert_eq!(wal.pending(), 0);
        let seqs: Vec<u64> = scan(&path).unwrap().records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(wal.append(30, vec![set("c", "3")]).unwrap(), 3);
    }

    #[test]
    fn test_append_and_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let mut wal = WalWriter::open(&path, FsyncPolicy::Always).unwrap();
        assert_eq!(wal.append(10, vec![set("a", "1")]).unwrap(), 1);
        assert_eq!(wal.append(20, vec![set("b", "2"), set("c", "3")]).unwrap(), 2);

        let scan = scan(&path).unwrap();
        assert!(!scan.torn);
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.records[1].time_ms, 20);
        assert_eq!(scan.records[1].commands.len(), 2);
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut wal = WalWriter::open(&path, FsyncPolicy::Always).unwrap();
            wal.append(1, vec![set("a", "1")]).unwrap();
            wal.append(2, vec![set("b", "2")]).unwrap();
        }

        // Chop the last frame in half.
        let full = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 5).unwrap();

        let scan = scan(&path).unwrap();
        assert!(scan.torn);
        assert_eq!(scan.records.len(), 1);

        let mut wal = WalWriter::open(&path, FsyncPolicy::Always).unwrap();
        assert_eq!(wal.last_seq(), 1);
        wal.append(3, vec![set("c", "3")]).unwrap();

        let scan = super::scan(&path).unwrap();
        assert!(!scan.torn);
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.records[1].seq, 2);
    }

    #[test]
    fn test_corrupt_checksum_stops_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = WalWriter::open(&path, FsyncPolicy::Always).unwrap();
            wal.append(1, vec![set("a", "1")]).unwrap();
            wal.append(2, vec![set("b", "2")]).unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let scan = scan(&path).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert!(scan.torn);
    }

    #[test]
    fn test_batched_policy_defers_sync() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        let mut wal = WalWriter::open(&path, FsyncPolicy::Batched { max_pending: 3 }).unwrap();

        wal.append(1, vec![set("a", "1")]).unwrap();
        wal.append(2, vec![set("b", "2")]).unwrap();
        assert_eq!(wal.pending(), 2);
        wal.append(3, vec![set("c", "3")]).unwrap();
        assert_eq!(wal.pending(), 0);
    }

    #[test]
    fn test_compact_keeps_newer_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        let mut wal = WalWriter::open(&path, FsyncPolicy::Always).unwrap();
        for i in 0..5 {
            wal.append(i, vec![set("k", &i.to_string())]).unwrap();
        }

        assert_eq!(wal.compact(3).unwrap(), 2);
        wal.append(9, vec![set("k", "9")]).unwrap();

        let seqs: Vec<u64> = scan(&path).unwrap().records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
    }

    #[test]
    fn test_wrong_magic_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        std::fs::write(&path, b"definitely not a log").unwrap();
        assert!(matches!(scan(&path), Err(EngineError::StorageCorrupt(_))));
    }
}
