use meridian_common::Digest;
use thiserror::Error;

/// Errors surfaced by [`crate::Trie`]. `Get`/`Delete` never error on a
/// missing key — that's represented as `Ok(None)` / a no-op, per the
/// not-found policy described in the crate's module docs.
#[derive(Debug, Error)]
pub enum TrieError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("node serialization overflowed its length encoding")]
    SerializationOverflow,
    #[error("node with hash {0:?} referenced from the tree was not found in storage")]
    MissingNode(Digest),
    #[error("attempted to prove a key in an empty trie")]
    NilNode,
    #[error("corrupt node encoding: {0}")]
    Decode(String),
}
