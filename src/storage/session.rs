//! Session checkpoint page: the values an index needs to reopen.

use std::convert::TryInto;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Result, SelvaError};
use crate::model::{NodeId, PAGE_SIZE};

pub const SESSION_FILE: &str = "session";

const FIELDS_LEN: usize = 3 * 8;

/// Checkpoint of the root id and the two global counters, persisted as a
/// fixed-size page on close and restored on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub root_id: NodeId,
    /// Highest node id assigned so far.
    pub node_counter: i64,
    /// Number of object records appended so far.
    pub object_counter: i64,
}

impl Session {
    /// Read the session page from `dir`; `None` when no checkpoint exists.
    pub fn read(dir: &Path) -> Result<Option<Session>> {
        let data = match fs::read(dir.join(SESSION_FILE)) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if data.len() < FIELDS_LEN {
            return Err(SelvaError::ShortRead {
                expected: FIELDS_LEN,
                got: data.len(),
            });
        }
        // Only the three leading fields are meaningful; the page tail is
        // unused and may hold anything.
        Ok(Some(Session {
            root_id: read_i64(&data, 0),
            node_counter: read_i64(&data, 8),
            object_counter: read_i64(&data, 16),
        }))
    }

    /// Write the checkpoint as a full page, zero-filling the unused tail.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..8].copy_from_slice(&self.root_id.to_le_bytes());
        page[8..16].copy_from_slice(&self.node_counter.to_le_bytes());
        page[16..24].copy_from_slice(&self.object_counter.to_le_bytes());
        fs::write(dir.join(SESSION_FILE), &page)?;
        Ok(())
    }
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(
        data[offset..offset + 8]
            .try_into()
            .expect("slice is 8 bytes"),
    )
}
