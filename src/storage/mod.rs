//! Persistent state: node pages, the payload log, and the session
//! checkpoint.

/// Node representation and the fixed-size page codec.
pub mod node;

/// Append-only payload log addressed by line number.
pub mod objects;

/// Session checkpoint page (root id and global counters).
pub mod session;
