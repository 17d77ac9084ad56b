//! File-backed store: one record file per key inside a directory.
//!
//! Records are written through a schema-versioned bincode envelope so the
//! on-disk format can evolve without guessing. Keys map to file names with
//! `:` replaced by `.` (`o:7` becomes `o.7.pkt`).

use super::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const RECORD_EXTENSION: &str = "pkt";
const SCHEMA_VERSION: u16 = 1;

/// Envelope written to disk for each in-flight frame.
#[derive(Debug, Serialize, Deserialize)]
struct StoreRecord {
    schema_version: u16,
    frame: Vec<u8>,
}

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", key.replace(':', ".")))
    }

    fn key_for(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(&format!(".{RECORD_EXTENSION}"))?;
        Some(stem.replacen('.', ":", 1))
    }
}

impl Store for FileStore {
    fn open(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn close(&self) {}

    fn reset(&self) -> Result<(), StoreError> {
        for key in self.all()? {
            self.del(&key)?;
        }
        Ok(())
    }

    fn put(&self, key: &str, frame: &[u8]) -> Result<(), StoreError> {
        let record = StoreRecord {
            schema_version: SCHEMA_VERSION,
            frame: frame.to_vec(),
        };
        let bytes = bincode::serialize(&record)
            .map_err(|err| StoreError::Corrupt(format!("encode {key}: {err}")))?;
        // Write-then-rename keeps the per-key atomicity contract.
        let tmp = self.path_for(key).with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: StoreRecord = bincode::deserialize(&bytes)
            .map_err(|err| StoreError::Corrupt(format!("decode {key}: {err}")))?;
        if record.schema_version != SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unknown schema version {} for {key}",
                record.schema_version
            )));
        }
        Ok(Some(record.frame))
    }

    fn del(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn all(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            if let Some(key) = Self::key_for(&entry?.path()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
