//! R-tree operations: insertion with quadratic node splits, point-equality
//! search, and a full-tree integrity walk.
//!
//! The tree lives on disk; every traversal step loads the node it needs by
//! id and stores mutations back immediately. Parent links are ids, not
//! references, so no decoded node ever points at another.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::{Result, SelvaError};
use crate::geom::Rect;
use crate::model::{NodeId, ObjectId, Point, MAX_ENTRIES, MIN_ENTRIES, NO_NODE};
use crate::pager::NodeStore;
use crate::storage::node::{Entry, Node};

/// Largest a group may grow during split distribution before the remainder
/// is dumped into the other group.
const GROUP_CAP: usize = MAX_ENTRIES - MIN_ENTRIES + 1;

/// Disk-backed R-tree over points.
pub struct RTree {
    store: NodeStore,
    root_id: NodeId,
}

impl RTree {
    /// Wrap an existing tree rooted at `root_id`.
    pub fn new(store: NodeStore, root_id: NodeId) -> Self {
        Self { store, root_id }
    }

    /// Create the initial empty tree: a single entry-less leaf as root.
    pub fn bootstrap(mut store: NodeStore) -> Result<Self> {
        let root = store.create();
        store.store(&root)?;
        Ok(Self {
            root_id: root.id,
            store,
        })
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Insert a reference to an object record. Returns the new root id when
    /// a split grew the tree, `None` otherwise.
    pub fn insert(&mut self, object_id: ObjectId, point: Point) -> Result<Option<NodeId>> {
        let leaf_id = self.descend_for_insert(&point)?;
        let mut leaf = self.store.load(leaf_id)?;
        leaf.entries.push(Entry::for_object(object_id, point));
        leaf.mbr = leaf.mbr.union_point(&point);
        leaf.size_of_subtree = leaf.entries.len() as u64;
        self.store.store(&leaf)?;

        if leaf.entries.len() > MAX_ENTRIES {
            let old_root = self.root_id;
            self.split(leaf)?;
            return Ok((self.root_id != old_root).then_some(self.root_id));
        }
        Ok(None)
    }

    /// Walk from the root to the leaf that should receive `point`,
    /// enlarging the chosen entry and bumping subtree counters on the way
    /// down. A split at the leaf rewrites these entries afterwards.
    fn descend_for_insert(&mut self, point: &Point) -> Result<NodeId> {
        let mut current = self.root_id;
        loop {
            let mut node = self.store.load(current)?;
            if node.leaf {
                return Ok(current);
            }
            let chosen = self.choose_subtree(&node, point)?;
            node.entries[chosen].rect = node.entries[chosen].rect.union_point(point);
            node.mbr = node.mbr.union_point(point);
            node.size_of_subtree += 1;
            self.store.store(&node)?;
            current = node.entries[chosen].child;
        }
    }

    /// Least enlargement wins; a tie goes to the smaller subtree (which
    /// costs a load per tied candidate), then to the earlier entry.
    fn choose_subtree(&mut self, node: &Node, point: &Point) -> Result<usize> {
        if node.entries.is_empty() {
            return Err(SelvaError::InvariantViolation(format!(
                "internal node {} has no entries",
                node.id
            )));
        }
        let mut best = 0;
        let mut best_growth = node.entries[0].rect.enlargement(point);
        let mut best_size: Option<u64> = None;
        for idx in 1..node.entries.len() {
            let growth = node.entries[idx].rect.enlargement(point);
            if growth < best_growth {
                best = idx;
                best_growth = growth;
                best_size = None;
            } else if growth == best_growth {
                let current_best = match best_size {
                    Some(size) => size,
                    None => {
                        let size = self.subtree_size(node, best)?;
                        best_size = Some(size);
                        size
                    }
                };
                let candidate = self.subtree_size(node, idx)?;
                if candidate < current_best {
                    best = idx;
                    best_size = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    fn subtree_size(&mut self, node: &Node, idx: usize) -> Result<u64> {
        Ok(self.store.load(node.entries[idx].child)?.size_of_subtree)
    }

    /// Guttman quadratic split of an overfull node, recursing upward while
    /// parents overflow. May install a new root.
    fn split(&mut self, mut node: Node) -> Result<()> {
        let entries = std::mem::take(&mut node.entries);
        let (keep, moved) = distribute(&entries, node.id)?;

        let mut sibling = self.store.create();
        sibling.leaf = node.leaf;
        sibling.parent = node.parent;
        node.entries = keep;
        sibling.entries = moved;
        node.recompute_mbr();
        sibling.recompute_mbr();

        if node.leaf {
            node.size_of_subtree = node.entries.len() as u64;
            sibling.size_of_subtree = sibling.entries.len() as u64;
        } else {
            node.size_of_subtree = self.sum_child_sizes(&node)?;
            // Children that migrated now answer to the sibling.
            let mut moved_total = 0;
            for entry in &sibling.entries {
                let mut child = self.store.load(entry.child)?;
                child.parent = sibling.id;
                moved_total += child.size_of_subtree;
                self.store.store(&child)?;
            }
            sibling.size_of_subtree = moved_total;
        }

        if node.is_root() {
            let mut root = self.store.create();
            root.leaf = false;
            root.size_of_subtree = node.size_of_subtree + sibling.size_of_subtree;
            root.entries = vec![
                Entry::new(node.id, node.mbr),
                Entry::new(sibling.id, sibling.mbr),
            ];
            root.recompute_mbr();
            node.parent = root.id;
            sibling.parent = root.id;
            self.store.store(&node)?;
            self.store.store(&sibling)?;
            self.store.store(&root)?;
            debug!(root = root.id, split = node.id, "root split grew the tree");
            self.root_id = root.id;
            return Ok(());
        }

        let parent_id = node.parent;
        self.store.store(&node)?;
        self.store.store(&sibling)?;

        let mut parent = self.store.load(parent_id)?;
        let idx = parent.entry_index_of(node.id).ok_or_else(|| {
            SelvaError::InvariantViolation(format!(
                "node {} missing from parent {parent_id}",
                node.id
            ))
        })?;
        parent.entries[idx].rect = node.mbr;
        parent.entries.push(Entry::new(sibling.id, sibling.mbr));
        parent.recompute_mbr();
        self.store.store(&parent)?;

        if parent.entries.len() > MAX_ENTRIES {
            self.split(parent)?;
        }
        Ok(())
    }

    fn sum_child_sizes(&mut self, node: &Node) -> Result<u64> {
        let mut total = 0;
        for entry in &node.entries {
            total += self.store.load(entry.child)?.size_of_subtree;
        }
        Ok(total)
    }

    /// Lazy depth-first point-equality search. Yields object ids in entry
    /// order within each visited node; branches whose rectangle does not
    /// reach the query point are pruned. Read-only.
    pub fn search_point(&mut self, point: Point) -> PointSearch<'_> {
        let stack = vec![self.root_id];
        PointSearch {
            tree: self,
            point,
            stack,
            ready: VecDeque::new(),
        }
    }

    /// Walk the whole tree and check the structural invariants: entry
    /// bounds, MBR/entry agreement, parent back-pointers, subtree sums,
    /// and uniform leaf depth.
    pub fn verify(&mut self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport {
            nodes: 0,
            leaves: 0,
            objects: 0,
            depth: 0,
        };
        let mut leaf_depth = None;
        self.verify_node(self.root_id, NO_NODE, None, 0, &mut leaf_depth, &mut report)?;
        report.depth = leaf_depth.unwrap_or(0);
        Ok(report)
    }

    fn verify_node(
        &mut self,
        id: NodeId,
        expected_parent: NodeId,
        expected_mbr: Option<Rect>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        report: &mut IntegrityReport,
    ) -> Result<u64> {
        let node = self.store.load(id)?;
        if node.parent != expected_parent {
            return Err(SelvaError::InvariantViolation(format!(
                "node {id} records parent {}, reached from {expected_parent}",
                node.parent
            )));
        }
        let is_root = expected_parent == NO_NODE;
        if node.entries.len() > MAX_ENTRIES {
            return Err(SelvaError::InvariantViolation(format!(
                "node {id} holds {} entries, cap is {MAX_ENTRIES}",
                node.entries.len()
            )));
        }
        if !is_root && node.entries.len() < MIN_ENTRIES {
            return Err(SelvaError::InvariantViolation(format!(
                "node {id} holds {} entries, floor is {MIN_ENTRIES}",
                node.entries.len()
            )));
        }
        if !node.entries.is_empty() {
            let mut union = Rect::empty();
            for entry in &node.entries {
                union = union.union(&entry.rect);
            }
            if union != node.mbr {
                return Err(SelvaError::InvariantViolation(format!(
                    "node {id} MBR disagrees with the union of its entries"
                )));
            }
        }
        if let Some(expected) = expected_mbr {
            if node.mbr != expected {
                return Err(SelvaError::InvariantViolation(format!(
                    "parent entry for node {id} disagrees with its MBR"
                )));
            }
        }
        report.nodes += 1;

        if node.leaf {
            report.leaves += 1;
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(first) if first == depth => {}
                Some(first) => {
                    return Err(SelvaError::InvariantViolation(format!(
                        "leaf {id} at depth {depth}, earlier leaves at {first}"
                    )))
                }
            }
            if node.size_of_subtree != node.entries.len() as u64 {
                return Err(SelvaError::InvariantViolation(format!(
                    "leaf {id} records subtree size {}, holds {} entries",
                    node.size_of_subtree,
                    node.entries.len()
                )));
            }
            report.objects += node.size_of_subtree;
            return Ok(node.size_of_subtree);
        }

        if node.entries.is_empty() {
            return Err(SelvaError::InvariantViolation(format!(
                "internal node {id} has no entries"
            )));
        }
        let mut total = 0;
        for entry in &node.entries {
            total += self.verify_node(
                entry.child,
                id,
                Some(entry.rect),
                depth + 1,
                leaf_depth,
                report,
            )?;
        }
        if node.size_of_subtree != total {
            return Err(SelvaError::InvariantViolation(format!(
                "node {id} records subtree size {}, children sum to {total}",
                node.size_of_subtree
            )));
        }
        Ok(total)
    }
}

/// Summary counters produced by a full-tree integrity walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    pub nodes: usize,
    pub leaves: usize,
    pub objects: u64,
    /// Depth of the (uniform) leaf level; zero when the root is a leaf.
    pub depth: usize,
}

/// Iterator over the object ids stored at exactly the query point.
pub struct PointSearch<'a> {
    tree: &'a mut RTree,
    point: Point,
    stack: Vec<NodeId>,
    ready: VecDeque<ObjectId>,
}

impl Iterator for PointSearch<'_> {
    type Item = Result<ObjectId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.ready.pop_front() {
                return Some(Ok(id));
            }
            let node_id = self.stack.pop()?;
            let node = match self.tree.store.load(node_id) {
                Ok(node) => node,
                Err(err) => {
                    self.stack.clear();
                    return Some(Err(err));
                }
            };
            if node.leaf {
                for entry in &node.entries {
                    if entry.rect.lower == self.point && entry.rect.upper == self.point {
                        self.ready.push_back(entry.child);
                    }
                }
            } else {
                // Reverse push keeps the visit in entry order.
                for entry in node.entries.iter().rev() {
                    if entry.rect.min_distance(&self.point) == 0.0 {
                        self.stack.push(entry.child);
                    }
                }
            }
        }
    }
}

/// Partition an overfull entry list into the group that stays in the split
/// node and the group that moves to the sibling.
fn distribute(entries: &[Entry], node_id: NodeId) -> Result<(Vec<Entry>, Vec<Entry>)> {
    let (seed_keep, seed_move) = pick_seeds(entries, node_id)?;
    let rect_keep = entries[seed_keep].rect;
    let rect_move = entries[seed_move].rect;
    let mut keep = vec![entries[seed_keep]];
    let mut moved = vec![entries[seed_move]];

    for (idx, entry) in entries.iter().enumerate() {
        if idx == seed_keep || idx == seed_move {
            continue;
        }
        if keep.len() >= GROUP_CAP {
            moved.push(*entry);
            continue;
        }
        if moved.len() >= GROUP_CAP {
            keep.push(*entry);
            continue;
        }
        // Waste against the seeds decides; a tie keeps the entry in place.
        if entry.rect.waste(&rect_keep) <= entry.rect.waste(&rect_move) {
            keep.push(*entry);
        } else {
            moved.push(*entry);
        }
    }

    if keep.len() < MIN_ENTRIES || moved.len() < MIN_ENTRIES {
        return Err(SelvaError::InvariantViolation(format!(
            "split of node {node_id} produced groups of {} and {}",
            keep.len(),
            moved.len()
        )));
    }
    Ok((keep, moved))
}

/// Highest-waste pair of entries; earlier pairs win ties.
fn pick_seeds(entries: &[Entry], node_id: NodeId) -> Result<(usize, usize)> {
    if entries.len() < 2 {
        return Err(SelvaError::InvariantViolation(format!(
            "split of node {node_id} with fewer than two entries"
        )));
    }
    let mut best = (0, 1);
    let mut best_waste = entries[0].rect.waste(&entries[1].rect);
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let waste = entries[i].rect.waste(&entries[j].rect);
            if waste > best_waste {
                best = (i, j);
                best_waste = waste;
            }
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tree(dir: &TempDir) -> RTree {
        let store = NodeStore::open(dir.path(), 0, 64, false).unwrap();
        RTree::bootstrap(store).unwrap()
    }

    fn object_entries(points: &[Point]) -> Vec<Entry> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| Entry::for_object(i as i64, *p))
            .collect()
    }

    fn ids(tree: &mut RTree, point: Point) -> Vec<ObjectId> {
        tree.search_point(point)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn pick_seeds_prefers_the_farthest_pair() {
        let entries = object_entries(&[[0.0, 0.0], [1.0, 1.0], [10.0, 10.0]]);
        assert_eq!(pick_seeds(&entries, 1).unwrap(), (0, 2));
    }

    #[test]
    fn pick_seeds_breaks_ties_lexicographically() {
        // All pairwise wastes are equal on a uniform line of points.
        let entries = object_entries(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]);
        assert_eq!(pick_seeds(&entries, 1).unwrap(), (0, 1));
    }

    #[test]
    fn distribute_respects_the_group_floor() {
        let entries = object_entries(&[
            [0.0, 0.0],
            [0.5, 0.5],
            [1.0, 1.0],
            [9.0, 9.0],
            [10.0, 10.0],
        ]);
        let (keep, moved) = distribute(&entries, 1).unwrap();
        assert_eq!(keep.len() + moved.len(), entries.len());
        assert!(keep.len() >= MIN_ENTRIES && keep.len() <= MAX_ENTRIES);
        assert!(moved.len() >= MIN_ENTRIES && moved.len() <= MAX_ENTRIES);
    }

    #[test]
    fn insert_until_root_split() {
        let dir = TempDir::new().unwrap();
        let mut tree = open_tree(&dir);
        let points: [Point; 4] = [[1.0, 2.0], [3.0, 1.0], [5.0, 10.0], [1.0, 1.0]];
        for (i, point) in points.iter().enumerate() {
            assert_eq!(tree.insert(i as i64, *point).unwrap(), None);
        }
        let report = tree.verify().unwrap();
        assert_eq!(report.nodes, 1);
        assert_eq!(report.depth, 0);

        // The fifth entry overflows the leaf and grows a new root.
        let new_root = tree.insert(4, [3.0, 4.0]).unwrap();
        assert_eq!(new_root, Some(tree.root_id()));

        let report = tree.verify().unwrap();
        assert_eq!(report.leaves, 2);
        assert_eq!(report.nodes, 3);
        assert_eq!(report.depth, 1);
        assert_eq!(report.objects, 5);

        let root = tree.store.load(tree.root_id()).unwrap();
        assert!(!root.leaf);
        assert_eq!(root.entries.len(), 2);
        assert_eq!(root.mbr, Rect::new([1.0, 1.0], [5.0, 10.0]));
    }

    #[test]
    fn search_finds_duplicates_and_nothing_else() {
        let dir = TempDir::new().unwrap();
        let mut tree = open_tree(&dir);
        for id in 0..6 {
            tree.insert(id, [1.0, 4.0]).unwrap();
        }
        tree.insert(6, [2.0, 2.0]).unwrap();

        let mut hits = ids(&mut tree, [1.0, 4.0]);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(ids(&mut tree, [2.0, 2.0]), vec![6]);
        assert_eq!(ids(&mut tree, [2.0, 3.0]), Vec::<ObjectId>::new());
        tree.verify().unwrap();
    }

    #[test]
    fn deep_tree_keeps_invariants() {
        let dir = TempDir::new().unwrap();
        let mut tree = open_tree(&dir);
        let mut id = 0;
        for x in 0..9 {
            for y in 0..9 {
                tree.insert(id, [x as f64, y as f64]).unwrap();
                id += 1;
            }
        }
        let report = tree.verify().unwrap();
        assert_eq!(report.objects, 81);
        assert!(report.depth >= 2);

        for probe in 0..id {
            let x = (probe / 9) as f64;
            let y = (probe % 9) as f64;
            assert!(ids(&mut tree, [x, y]).contains(&probe));
        }
        assert!(ids(&mut tree, [20.0, 20.0]).is_empty());
    }

    #[test]
    fn search_on_empty_tree_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut tree = open_tree(&dir);
        assert!(ids(&mut tree, [0.0, 0.0]).is_empty());
        let report = tree.verify().unwrap();
        assert_eq!(report.objects, 0);
        assert_eq!(report.nodes, 1);
    }
}
