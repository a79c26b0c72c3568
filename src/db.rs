//! Driver layer: opening, inserting, searching, and closing an index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SelvaError};
use crate::geom::point_from;
use crate::index::rtree::{IntegrityReport, PointSearch, RTree};
use crate::model::NodeId;
use crate::pager::{NodeStore, DEFAULT_CACHE_NODES};
use crate::storage::objects::ObjectStore;
use crate::storage::session::Session;

/// Tunables for opening an index.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the node read cache, in nodes.
    pub cache_nodes: usize,
    /// Issue fsync after every page and log write instead of relying on
    /// the OS to drain its buffers.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_nodes: DEFAULT_CACHE_NODES,
            sync_writes: false,
        }
    }
}

impl Config {
    /// Every write reaches stable storage before the call returns.
    pub fn durable() -> Self {
        Self {
            sync_writes: true,
            ..Self::default()
        }
    }
}

/// A disk-backed spatial index over fixed-dimension points paired with
/// string payloads.
///
/// All state lives under one directory: node pages in `leaves/`, payloads
/// in `objects.log`, and the `session` checkpoint written by
/// [`SpatialIndex::close`].
pub struct SpatialIndex {
    dir: PathBuf,
    tree: RTree,
    objects: ObjectStore,
}

impl SpatialIndex {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, Config::default())
    }

    /// Open the index in `dir`, restoring the previous session if one was
    /// checkpointed there; otherwise bootstrap a fresh empty index.
    pub fn open_with_config(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let (tree, objects) = match Session::read(&dir)? {
            Some(session) => {
                let mut store = NodeStore::open(
                    &dir,
                    session.node_counter,
                    config.cache_nodes,
                    config.sync_writes,
                )?;
                // Surface a broken checkpoint now rather than on first use.
                store.load(session.root_id)?;
                let objects = ObjectStore::open(&dir, session.object_counter, config.sync_writes)?;
                debug!(
                    root = session.root_id,
                    nodes = session.node_counter,
                    objects = session.object_counter,
                    "session restored"
                );
                (RTree::new(store, session.root_id), objects)
            }
            None => {
                let store =
                    NodeStore::open(&dir, 0, config.cache_nodes, config.sync_writes)?;
                let tree = RTree::bootstrap(store)?;
                let objects = ObjectStore::open(&dir, 0, config.sync_writes)?;
                info!(path = %dir.display(), "created fresh index");
                (tree, objects)
            }
        };

        Ok(Self { dir, tree, objects })
    }

    /// Insert one record. May split nodes and may move the root.
    pub fn insert(&mut self, point: &[f64], payload: &str) -> Result<()> {
        let point = point_from(point)?;
        let object_id = self.objects.append(payload)?;
        if let Some(new_root) = self.tree.insert(object_id, point)? {
            debug!(root = new_root, "tree grew a new root");
        }
        Ok(())
    }

    /// Lazily yield the payload of every record stored at exactly `point`.
    /// The sequence is finite and not restartable; a miss yields nothing.
    pub fn search(&mut self, point: &[f64]) -> Result<SearchResults<'_>> {
        let point = point_from(point)?;
        let SpatialIndex { tree, objects, .. } = self;
        Ok(SearchResults {
            hits: tree.search_point(point),
            objects,
        })
    }

    /// Walk the tree and check the structural invariants.
    pub fn verify(&mut self) -> Result<IntegrityReport> {
        self.tree.verify()
    }

    pub fn object_count(&self) -> i64 {
        self.objects.len()
    }

    /// Highest node id allocated so far.
    pub fn last_node_id(&self) -> NodeId {
        self.tree.store().last_id()
    }

    pub fn root_id(&self) -> NodeId {
        self.tree.root_id()
    }

    /// Checkpoint the session page and release the index. All node pages
    /// and log records are already on disk.
    pub fn close(self) -> Result<()> {
        let session = Session {
            root_id: self.tree.root_id(),
            node_counter: self.tree.store().last_id(),
            object_counter: self.objects.len(),
        };
        session.write(&self.dir)?;
        debug!(root = session.root_id, "session checkpoint written");
        Ok(())
    }
}

/// Payload iterator returned by [`SpatialIndex::search`].
pub struct SearchResults<'a> {
    hits: PointSearch<'a>,
    objects: &'a ObjectStore,
}

impl Iterator for SearchResults<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.hits.next()? {
            Ok(id) => Some(self.objects.fetch(id)),
            Err(err) => Some(Err(err)),
        }
    }
}

/// Clonable handle serializing all access to one index behind a mutex, for
/// callers that share it across threads. Search results are collected
/// eagerly because the lock is released on return.
#[derive(Clone)]
pub struct SharedIndex {
    inner: Arc<Mutex<SpatialIndex>>,
}

impl SharedIndex {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(SpatialIndex::open(dir)?)),
        })
    }

    pub fn insert(&self, point: &[f64], payload: &str) -> Result<()> {
        self.inner.lock().insert(point, payload)
    }

    pub fn search(&self, point: &[f64]) -> Result<Vec<String>> {
        self.inner.lock().search(point)?.collect()
    }

    /// Checkpoint and release. Fails while other handles are still alive.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().close(),
            Err(_) => Err(SelvaError::InvalidArgument(
                "other handles to this index are still open".into(),
            )),
        }
    }
}
