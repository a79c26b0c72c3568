use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SelvaError>;

#[derive(Debug, Error)]
pub enum SelvaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("node {0} not found")]
    NodeNotFound(i64),
    #[error("object {0} not found")]
    ObjectNotFound(i64),
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("malformed page: {0}")]
    MalformedPage(String),
    #[error("dimension mismatch: expected {expected} coordinates, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
