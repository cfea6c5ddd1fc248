//! Error types for store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// What a listener callback returns. An `Err` is logged and dispatch goes on.
pub type ListenerResult = Result<(), Box<dyn std::error::Error>>;

/// Structural misuse of the observed tree.
///
/// Malformed paths on plain reads are not errors: [`Store::get`](crate::Store::get)
/// answers `None`. These variants signal a broken caller contract instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A sequence operation was called on a map.
    #[error("not a sequence: {path}")]
    NotASequence {
        /// A path reaching the node, or `<detached>`.
        path: String,
    },

    /// A key removal was called on a sequence.
    #[error("not a map: {path}")]
    NotAMap {
        /// A path reaching the node, or `<detached>`.
        path: String,
    },

    /// A path walked through a scalar where a container was needed.
    #[error("not a container at {path}")]
    NotAContainer {
        /// The path of the scalar.
        path: String,
    },

    /// A non-numeric segment was used against a sequence.
    #[error("invalid sequence index {segment:?} at {path}")]
    InvalidIndex {
        /// The offending segment.
        segment: String,
        /// The path of the sequence.
        path: String,
    },

    /// A sequence position past the end.
    #[error("index {index} out of bounds (len: {len})")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The sequence length.
        len: usize,
    },

    /// The handle's node was pruned after it became unreachable.
    #[error("node is no longer part of the store")]
    DetachedNode,
}
