use thiserror::Error;

/// Errors returned by [`AvlTree`](crate::AvlTree) mutations.
///
/// A failing call never changes the tree: it stays in the last fully
/// rebalanced state.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// `insert` was called with a key that is already stored.
    #[error("key already present in the tree")]
    DuplicateKey,
    /// `remove` was called with a key that is not stored.
    #[error("key not found in the tree")]
    KeyNotFound,
}
