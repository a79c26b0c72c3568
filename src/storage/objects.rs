//! Append-only payload log addressed by line number.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SelvaError};
use crate::model::ObjectId;

pub const OBJECT_LOG: &str = "objects.log";

/// Append-only UTF-8 text log holding one payload per line. The zero-based
/// line number of a record is its object id; a record is immutable once
/// written.
pub struct ObjectStore {
    path: PathBuf,
    log: File,
    count: i64,
    sync_writes: bool,
}

impl ObjectStore {
    /// Open (or create) the log in `index_dir`. `count` restores the
    /// object counter from a session checkpoint.
    pub fn open(index_dir: &Path, count: i64, sync_writes: bool) -> Result<Self> {
        let path = index_dir.join(OBJECT_LOG);
        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            log,
            count,
            sync_writes,
        })
    }

    /// Number of records written so far; also the next object id.
    pub fn len(&self) -> i64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one payload on a fresh line and return its object id.
    pub fn append(&mut self, payload: &str) -> Result<ObjectId> {
        if payload.contains('\n') {
            return Err(SelvaError::InvalidArgument(
                "payload must not contain a newline".into(),
            ));
        }
        self.log.write_all(payload.as_bytes())?;
        self.log.write_all(b"\n")?;
        self.log.flush()?;
        if self.sync_writes {
            self.log.sync_data()?;
        }
        let id = self.count;
        self.count += 1;
        Ok(id)
    }

    /// Fetch the payload stored at `id`, scanning the log from the start.
    pub fn fetch(&self, id: ObjectId) -> Result<String> {
        if id < 0 || id >= self.count {
            return Err(SelvaError::ObjectNotFound(id));
        }
        let reader = BufReader::new(File::open(&self.path)?);
        match reader.lines().nth(id as usize) {
            Some(line) => Ok(line?),
            None => Err(SelvaError::ObjectNotFound(id)),
        }
    }
}
