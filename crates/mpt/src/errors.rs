//! Errors for the `monad-mpt` crate.

/// A [Result] type alias where the error is [DbError].
pub type DbResult<T> = Result<T, DbError>;

/// An error type for trie and database operations.
#[derive(Debug, derive_more::Display, Clone, PartialEq, Eq)]
pub enum DbError {
    /// An operation was attempted against a null root.
    #[display("root node is null")]
    RootNodeIsNull,
    /// The lookup key was exhausted before the node's path prefix.
    #[display("key ends earlier than node")]
    KeyEndsEarlierThanNode,
    /// A branch child required by the key does not exist.
    #[display("branch does not exist")]
    BranchNotExist,
    /// A leaf or extension prefix disagrees with the key.
    #[display("key mismatch")]
    KeyMismatch,
    /// A terminal node on the key path is not a leaf.
    #[display("node is not a leaf")]
    NodeIsNotLeaf,
    /// Failed to decode a trie node.
    #[display("failed to decode trie node: {_0}")]
    Rlp(alloy_rlp::Error),
    /// The node store could not serve a content-addressed read.
    #[display("node store error: {_0}")]
    Store(String),
}

impl core::error::Error for DbError {}

impl From<alloy_rlp::Error> for DbError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Rlp(err)
    }
}

/// A [Result] type alias where the error is [DecodeError].
pub type DecodeResult<T> = Result<T, DecodeError>;

/// An error type for fixed-layout value codecs (storage pages, version tags).
#[derive(Debug, derive_more::Display, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before the encoding was complete.
    #[display("input too short")]
    InputTooShort,
    /// The encoding describes more content than the value can hold.
    #[display("input too long")]
    InputTooLong,
    /// A length or counter overflowed its domain.
    #[display("overflow")]
    Overflow,
    /// A list was found where a string was expected.
    #[display("unexpected list")]
    UnexpectedList,
    /// An element has an impossible length.
    #[display("unexpected length")]
    UnexpectedLength,
}

impl core::error::Error for DecodeError {}

impl From<alloy_rlp::Error> for DecodeError {
    fn from(err: alloy_rlp::Error) -> Self {
        match err {
            alloy_rlp::Error::InputTooShort => Self::InputTooShort,
            alloy_rlp::Error::UnexpectedList => Self::UnexpectedList,
            alloy_rlp::Error::Overflow => Self::Overflow,
            _ => Self::UnexpectedLength,
        }
    }
}
