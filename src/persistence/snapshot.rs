//! Point-in-time snapshots of the keyspace.
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────┐
//! │ magic (8 B)  │ crc32 u32 LE │ bincode(Snapshot)            │
//! └──────────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! Snapshots are written to a temporary file in the target directory and
//! renamed over the previous one, so readers only ever see a complete file.

use crate::error::{EngineError, Result};
use crate::storage::KeyRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const SNAPSHOT_MAGIC: &[u8; 8] = b"EMBRSNP1";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub created_at_ms: u64,
    /// Newest WAL record already reflected in `entries`.
    pub last_seq: u64,
    pub entries: Vec<KeyRecord>,
}

impl Snapshot {
    pub fn new(created_at_ms: u64, last_seq: u64, entries: Vec<KeyRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            created_at_ms,
            last_seq,
            entries,
        }
    }

    /// Atomically replaces the snapshot at `path`.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    pub fn write_to(&self, path: &Path) -> Result<u64> {
        let payload = bincode::serialize(self)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(SNAPSHOT_MAGIC)?;
        tmp.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| EngineError::StorageIo(e.error))?;

        Ok((SNAPSHOT_MAGIC.len() + 4 + payload.len()) as u64)
    }

    /// Loads the snapshot at `path`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if there is no snapshot, `Err(StorageCorrupt)` if the file
    /// fails validation.
    pub fn read_from(path: &Path) -> Result<Option<Snapshot>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let header = SNAPSHOT_MAGIC.len() + 4;
        if bytes.len() < header || &bytes[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(EngineError::StorageCorrupt("bad snapshot header".to_string()));
        }
        let stored_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let payload = &bytes[header..];
        if crc32fast::hash(payload) != stored_crc {
            return Err(EngineError::StorageCorrupt(
                "snapshot checksum mismatch".to_string(),
            ));
        }

        let snapshot: Snapshot = bincode::deserialize(payload)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::StorageCorrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ListValue, Value};
    use bytes::Bytes;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut list = ListValue::default();
        list.push(crate::types::list::End::Right, &[Bytes::from("x"), Bytes::from("y")]);
        Snapshot::new(
            1_000,
            7,
            vec![
                KeyRecord {
                    key: Bytes::from("list"),
                    value: Value::List(list),
                    expires_at_ms: Some(99_000),
                },
                KeyRecord {
                    key: Bytes::from("str"),
                    value: Value::String(Bytes::from("v")),
                    expires_at_ms: None,
                },
            ],
        )
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.snap");

        assert!(Snapshot::read_from(&path).unwrap().is_none());
        let snapshot = sample();
        snapshot.write_to(&path).unwrap();
        assert_eq!(Snapshot::read_from(&path).unwrap(), Some(snapshot));
    }

    #[test]
    fn test_corruption_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.snap");
        sample().write_to(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x55;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            Snapshot::read_from(&path),
            Err(EngineError::StorageCorrupt(_))
        ));
    }

    #[test]
    fn test_rewrite_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.snap");
        sample().write_to(&path).unwrap();
        Snapshot::new(2_000, 9, Vec::new()).write_to(&path).unwrap();

        let loaded = Snapshot::read_from(&path).unwrap().unwrap();
        assert_eq!(loaded.last_seq, 9);
        assert!(loaded.entries.is_empty());
        // No temp files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
