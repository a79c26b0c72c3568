//! End-to-end scenarios exercising insertion, splitting, and search
//! against an index directory, with a full integrity walk after each.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::TempDir;

use selva::pager::NodeStore;
use selva::storage::session::Session;
use selva::{Rect, SpatialIndex};

fn payloads(index: &mut SpatialIndex, point: &[f64]) -> Vec<String> {
    index
        .search(point)
        .expect("search")
        .collect::<selva::Result<Vec<_>>>()
        .expect("collect payloads")
}

/// Read the root node straight off disk through the public storage API.
fn root_on_disk(dir: &TempDir) -> selva::storage::node::Node {
    let session = Session::read(dir.path())
        .expect("read session")
        .expect("session present");
    let mut store =
        NodeStore::open(dir.path(), session.node_counter, 8, false).expect("open store");
    store.load(session.root_id).expect("load root")
}

#[test]
fn single_insert_is_findable() {
    let dir = TempDir::new().unwrap();
    let mut index = SpatialIndex::open(dir.path()).unwrap();
    index.insert(&[1.0, 2.0], "a").unwrap();

    assert_eq!(payloads(&mut index, &[1.0, 2.0]), vec!["a"]);
    assert!(payloads(&mut index, &[1.0, 3.0]).is_empty());

    let report = index.verify().unwrap();
    assert_eq!(report.nodes, 1);
    assert_eq!(report.objects, 1);
}

#[test]
fn four_inserts_fill_one_leaf() {
    let dir = TempDir::new().unwrap();
    let mut index = SpatialIndex::open(dir.path()).unwrap();
    index.insert(&[1.0, 2.0], "a").unwrap();
    index.insert(&[3.0, 1.0], "b").unwrap();
    index.insert(&[5.0, 10.0], "c").unwrap();
    index.insert(&[1.0, 1.0], "d").unwrap();

    let report = index.verify().unwrap();
    assert_eq!(report.nodes, 1);
    assert_eq!(report.leaves, 1);
    assert_eq!(report.depth, 0);
    index.close().unwrap();

    let root = root_on_disk(&dir);
    assert!(root.leaf);
    assert_eq!(root.entries.len(), 4);
    assert_eq!(root.mbr, Rect::new([1.0, 1.0], [5.0, 10.0]));
}

#[test]
fn fifth_insert_splits_the_root_leaf() {
    let dir = TempDir::new().unwrap();
    let mut index = SpatialIndex::open(dir.path()).unwrap();
    for (point, payload) in [
        ([1.0, 2.0], "a"),
        ([3.0, 1.0], "b"),
        ([5.0, 10.0], "c"),
        ([1.0, 1.0], "d"),
        ([3.0, 4.0], "e"),
    ] {
        index.insert(&point, payload).unwrap();
    }

    let report = index.verify().unwrap();
    assert_eq!(report.nodes, 3);
    assert_eq!(report.leaves, 2);
    assert_eq!(report.depth, 1);
    assert_eq!(report.objects, 5);

    for (point, payload) in [([1.0, 2.0], "a"), ([3.0, 4.0], "e"), ([5.0, 10.0], "c")] {
        assert_eq!(payloads(&mut index, &point), vec![payload]);
    }
    index.close().unwrap();

    let root = root_on_disk(&dir);
    assert!(!root.leaf);
    assert_eq!(root.entries.len(), 2);
    let union = root.entries[0].rect.union(&root.entries[1].rect);
    assert_eq!(union, Rect::new([1.0, 1.0], [5.0, 10.0]));
}

#[test]
fn repeated_point_keeps_every_record() {
    let dir = TempDir::new().unwrap();
    let mut index = SpatialIndex::open(dir.path()).unwrap();
    for _ in 0..6 {
        index.insert(&[1.0, 4.0], "s").unwrap();
    }

    let hits = payloads(&mut index, &[1.0, 4.0]);
    assert_eq!(hits.len(), 6);
    assert!(hits.iter().all(|payload| payload == "s"));

    let report = index.verify().unwrap();
    assert_eq!(report.objects, 6);
}

#[test]
fn exact_match_only() {
    let dir = TempDir::new().unwrap();
    let mut index = SpatialIndex::open(dir.path()).unwrap();
    index.insert(&[2.0, 2.0], "x").unwrap();
    assert_eq!(payloads(&mut index, &[2.0, 2.0]), vec!["x"]);
    assert!(payloads(&mut index, &[2.0, 3.0]).is_empty());
}

#[test]
fn shuffled_grid_workload_upholds_invariants() {
    let dir = TempDir::new().unwrap();
    let mut index = SpatialIndex::open(dir.path()).unwrap();

    let mut points: Vec<(i64, i64)> = (0..10).flat_map(|x| (0..10).map(move |y| (x, y))).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    points.shuffle(&mut rng);

    for &(x, y) in &points {
        let payload = format!("cell-{x}-{y}");
        index.insert(&[x as f64, y as f64], &payload).unwrap();
        index.verify().unwrap();
    }

    let report = index.verify().unwrap();
    assert_eq!(report.objects, 100);
    assert!(report.depth >= 2);

    for &(x, y) in &points {
        assert_eq!(
            payloads(&mut index, &[x as f64, y as f64]),
            vec![format!("cell-{x}-{y}")]
        );
    }
    assert!(payloads(&mut index, &[-1.0, 5.0]).is_empty());
}
