//! In-memory node representation and the fixed-size page codec.
//!
//! Every node serializes to exactly one [`PAGE_SIZE`] page: a flat
//! little-endian header (leaf flag, id, parent, subtree size, MBR corners,
//! entry count) followed by the entries. Bytes past the last entry are
//! unused; the decoder never inspects them.

use std::convert::TryInto;

use crate::error::{Result, SelvaError};
use crate::geom::Rect;
use crate::model::{
    NodeId, ObjectId, Point, DIMENSION, ENTRY_LEN, NODE_HEADER_LEN, NO_NODE, PAGE_SIZE,
};

/// One child reference: a subtree page for internal nodes, an object record
/// for leaves. The rectangle is the child's MBR; for an object it is the
/// degenerate rectangle at the indexed point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub child: i64,
    pub rect: Rect,
}

impl Entry {
    pub fn new(child: i64, rect: Rect) -> Self {
        Self { child, rect }
    }

    pub fn for_object(id: ObjectId, point: Point) -> Self {
        Self {
            child: id,
            rect: Rect::from_point(point),
        }
    }
}

/// A tree node as held in memory between a `load` and a `store`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// True iff the entries reference object records rather than nodes.
    pub leaf: bool,
    pub id: NodeId,
    /// Parent node id, [`NO_NODE`] for the root.
    pub parent: NodeId,
    /// Object records reachable through this node.
    pub size_of_subtree: u64,
    pub mbr: Rect,
    pub entries: Vec<Entry>,
}

impl Node {
    /// Fresh empty leaf carrying `id`. The MBR starts at the empty
    /// sentinel so the first union tightens it.
    pub fn new_leaf(id: NodeId) -> Self {
        Self {
            leaf: true,
            id,
            parent: NO_NODE,
            size_of_subtree: 0,
            mbr: Rect::empty(),
            entries: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent == NO_NODE
    }

    /// Recompute the MBR from the entries; back to the empty sentinel when
    /// there are none.
    pub fn recompute_mbr(&mut self) {
        let mut mbr = Rect::empty();
        for entry in &self.entries {
            mbr = mbr.union(&entry.rect);
        }
        self.mbr = mbr;
    }

    /// Position of the entry referencing `child`, if present.
    pub fn entry_index_of(&self, child: i64) -> Option<usize> {
        self.entries.iter().position(|entry| entry.child == child)
    }

    /// Serialize into a fresh page image of exactly [`PAGE_SIZE`] bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let needed = NODE_HEADER_LEN + self.entries.len() * ENTRY_LEN;
        if needed > PAGE_SIZE {
            return Err(SelvaError::InvariantViolation(format!(
                "node {} carries {} entries, more than fit a page",
                self.id,
                self.entries.len()
            )));
        }

        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = u8::from(self.leaf);
        let mut off = 1;
        off = write_i64(&mut page, off, self.id);
        off = write_i64(&mut page, off, self.parent);
        off = write_i64(&mut page, off, self.size_of_subtree as i64);
        for i in 0..DIMENSION {
            off = write_f64(&mut page, off, self.mbr.upper[i]);
        }
        for i in 0..DIMENSION {
            off = write_f64(&mut page, off, self.mbr.lower[i]);
        }
        off = write_i64(&mut page, off, self.entries.len() as i64);
        for entry in &self.entries {
            off = write_i64(&mut page, off, entry.child);
            for i in 0..DIMENSION {
                off = write_f64(&mut page, off, entry.rect.lower[i]);
                off = write_f64(&mut page, off, entry.rect.upper[i]);
            }
        }
        debug_assert_eq!(off, needed);
        Ok(page)
    }

    /// Decode a page image. The buffer must hold a full page; the declared
    /// entry count must fit in it.
    pub fn decode(page: &[u8]) -> Result<Node> {
        if page.len() < PAGE_SIZE {
            return Err(SelvaError::ShortRead {
                expected: PAGE_SIZE,
                got: page.len(),
            });
        }

        let leaf = match page[0] {
            0 => false,
            1 => true,
            other => {
                return Err(SelvaError::MalformedPage(format!(
                    "leaf flag must be 0 or 1, found {other}"
                )))
            }
        };
        let mut off = 1;
        let id = read_i64(page, &mut off);
        let parent = read_i64(page, &mut off);
        let size = read_i64(page, &mut off);
        if size < 0 {
            return Err(SelvaError::MalformedPage(format!(
                "negative subtree size {size}"
            )));
        }
        let mut upper = [0.0; DIMENSION];
        for slot in upper.iter_mut() {
            *slot = read_f64(page, &mut off);
        }
        let mut lower = [0.0; DIMENSION];
        for slot in lower.iter_mut() {
            *slot = read_f64(page, &mut off);
        }
        let n_entries = read_i64(page, &mut off);
        let n_entries = usize::try_from(n_entries).map_err(|_| {
            SelvaError::MalformedPage(format!("negative entry count {n_entries}"))
        })?;
        if NODE_HEADER_LEN + n_entries * ENTRY_LEN > PAGE_SIZE {
            return Err(SelvaError::MalformedPage(format!(
                "entry count {n_entries} exceeds page capacity"
            )));
        }

        let mut entries = Vec::with_capacity(n_entries);
        for _ in 0..n_entries {
            let child = read_i64(page, &mut off);
            let mut rect = Rect::from_point([0.0; DIMENSION]);
            for i in 0..DIMENSION {
                rect.lower[i] = read_f64(page, &mut off);
                rect.upper[i] = read_f64(page, &mut off);
            }
            entries.push(Entry::new(child, rect));
        }

        Ok(Node {
            leaf,
            id,
            parent,
            size_of_subtree: size as u64,
            mbr: Rect::new(lower, upper),
            entries,
        })
    }
}

fn write_i64(page: &mut [u8], off: usize, value: i64) -> usize {
    page[off..off + 8].copy_from_slice(&value.to_le_bytes());
    off + 8
}

fn write_f64(page: &mut [u8], off: usize, value: f64) -> usize {
    page[off..off + 8].copy_from_slice(&value.to_le_bytes());
    off + 8
}

fn read_i64(page: &[u8], off: &mut usize) -> i64 {
    let value = i64::from_le_bytes(page[*off..*off + 8].try_into().expect("slice is 8 bytes"));
    *off += 8;
    value
}

fn read_f64(page: &[u8], off: &mut usize) -> f64 {
    let value = f64::from_le_bytes(page[*off..*off + 8].try_into().expect("slice is 8 bytes"));
    *off += 8;
    value
}
