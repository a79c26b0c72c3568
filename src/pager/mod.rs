//! Disk layer mapping node ids to fixed-size page files.

use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;

use crate::error::{Result, SelvaError};
use crate::model::NodeId;
use crate::storage::node::Node;

pub const DEFAULT_CACHE_NODES: usize = 256;

const LEAVES_DIR: &str = "leaves";
const PAGE_PREFIX: &str = "leaf_";

/// Maps node ids to one page file each under `<index dir>/leaves/`.
///
/// Callers own loaded nodes: mutations happen in memory and reach disk only
/// through [`NodeStore::store`]. The cache is read-through and written
/// through on every store, so it never serves a stale page.
pub struct NodeStore {
    dir: PathBuf,
    last_id: NodeId,
    cache: LruCache<NodeId, Node>,
    sync_writes: bool,
}

impl NodeStore {
    /// Open the page directory, creating it if needed. `last_id` restores
    /// the node-id counter from a session checkpoint (zero for a fresh
    /// index).
    pub fn open(
        index_dir: &Path,
        last_id: NodeId,
        cache_nodes: usize,
        sync_writes: bool,
    ) -> Result<Self> {
        let dir = index_dir.join(LEAVES_DIR);
        fs::create_dir_all(&dir)?;
        let capacity = NonZeroUsize::new(cache_nodes)
            .unwrap_or(NonZeroUsize::new(DEFAULT_CACHE_NODES).expect("default is non-zero"));
        Ok(Self {
            dir,
            last_id,
            cache: LruCache::new(capacity),
            sync_writes,
        })
    }

    /// Highest node id handed out so far.
    pub fn last_id(&self) -> NodeId {
        self.last_id
    }

    /// Allocate a fresh id and hand back an empty leaf carrying it. The
    /// node reaches disk on its first `store`.
    pub fn create(&mut self) -> Node {
        self.last_id += 1;
        Node::new_leaf(self.last_id)
    }

    /// Read and decode page `id`.
    pub fn load(&mut self, id: NodeId) -> Result<Node> {
        if let Some(node) = self.cache.get(&id) {
            return Ok(node.clone());
        }
        let data = match fs::read(self.page_path(id)) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SelvaError::NodeNotFound(id))
            }
            Err(err) => return Err(err.into()),
        };
        let node = Node::decode(&data)?;
        if node.id != id {
            return Err(SelvaError::MalformedPage(format!(
                "page {id} declares id {}",
                node.id
            )));
        }
        self.cache.put(id, node.clone());
        Ok(node)
    }

    /// Encode `node` and overwrite its page.
    pub fn store(&mut self, node: &Node) -> Result<()> {
        let page = node.encode()?;
        let path = self.page_path(node.id);
        if self.sync_writes {
            let mut file = File::create(&path)?;
            file.write_all(&page)?;
            file.sync_data()?;
        } else {
            fs::write(&path, &page)?;
        }
        self.cache.put(node.id, node.clone());
        Ok(())
    }

    fn page_path(&self, id: NodeId) -> PathBuf {
        self.dir.join(format!("{PAGE_PREFIX}{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Rect;
    use crate::storage::node::Entry;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> NodeStore {
        NodeStore::open(dir.path(), 0, 16, false).expect("open store")
    }

    #[test]
    fn create_assigns_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        assert_eq!(store.create().id, 1);
        assert_eq!(store.create().id, 2);
        assert_eq!(store.last_id(), 2);
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let mut node = store.create();
        node.entries.push(Entry::new(0, Rect::from_point([1.0, 2.0])));
        node.size_of_subtree = 1;
        node.recompute_mbr();
        store.store(&node).unwrap();

        let mut reopened = NodeStore::open(dir.path(), store.last_id(), 16, false).unwrap();
        assert_eq!(reopened.load(node.id).unwrap(), node);
    }

    #[test]
    fn loading_unknown_id_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        assert!(matches!(
            store.load(42).unwrap_err(),
            SelvaError::NodeNotFound(42)
        ));
    }

    #[test]
    fn truncated_page_reports_short_read() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let node = store.create();
        store.store(&node).unwrap();

        let path = dir.path().join(LEAVES_DIR).join(format!("{PAGE_PREFIX}{}", node.id));
        fs::write(&path, &[0u8; 100]).unwrap();

        let mut cold = NodeStore::open(dir.path(), 1, 16, false).unwrap();
        assert!(matches!(
            cold.load(node.id).unwrap_err(),
            SelvaError::ShortRead { got: 100, .. }
        ));
    }

    #[test]
    fn cache_reflects_the_latest_store() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let mut node = store.create();
        store.store(&node).unwrap();
        node.entries.push(Entry::new(0, Rect::from_point([5.0, 5.0])));
        node.size_of_subtree = 1;
        node.recompute_mbr();
        store.store(&node).unwrap();
        assert_eq!(store.load(node.id).unwrap().entries.len(), 1);
    }

    #[test]
    fn mismatched_page_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let node = store.create();
        store.store(&node).unwrap();

        // Copy node 1's page under the name of node 2.
        let leaves = dir.path().join(LEAVES_DIR);
        fs::copy(
            leaves.join(format!("{PAGE_PREFIX}1")),
            leaves.join(format!("{PAGE_PREFIX}2")),
        )
        .unwrap();
        let mut cold = NodeStore::open(dir.path(), 2, 16, false).unwrap();
        assert!(matches!(
            cold.load(2).unwrap_err(),
            SelvaError::MalformedPage(_)
        ));
    }
}
