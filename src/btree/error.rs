use thiserror::Error;

use super::BPlusKey;
use super::node::NodeId;
use super::overflow::ChainId;

/// Errors that can occur during B+ tree operations
#[derive(Debug, Clone, Error)]
pub enum BPlusTreeError {
    #[error("Invalid range: end key {end} must be greater than start key {start}")]
    InvalidRange { start: BPlusKey, end: BPlusKey },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid tree state: {0}")]
    InvalidState(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Overflow chain not found: {0}")]
    ChainNotFound(ChainId),

    #[error("Invalid max keys per node: {0} (must be >= 2)")]
    InvalidMaxKeys(usize),

    #[error("Invalid overflow segment capacity: {0} (must be >= 1)")]
    InvalidOverflowCapacity(usize),
}

pub type BPlusTreeResult<T> = Result<T, BPlusTreeError>;
