//! State error types

use bach_crypto::H256;
use thiserror::Error;

/// Errors from state database operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Revision id was never issued or has already been reverted
    #[error("revision id {0} cannot be reverted")]
    InvalidRevision(usize),

    /// Balance would underflow
    #[error("insufficient balance for {address:?}")]
    InsufficientBalance {
        /// Account being debited
        address: bach_crypto::Address,
    },
}

/// Errors from the snapshot tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// No layer is known for the requested root
    #[error("snapshot [{0:#x}] missing")]
    Missing(H256),

    /// A layer cannot sit on top of itself
    #[error("snapshot cycle")]
    Cycle,

    /// Parent root of a new layer is unknown
    #[error("parent [{0:#x}] snapshot missing")]
    MissingParent(H256),
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;
