//! Spatial index structures.

pub mod rtree;

pub use rtree::{IntegrityReport, PointSearch, RTree};
