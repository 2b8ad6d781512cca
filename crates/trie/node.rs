mod branch;
mod extension;
mod leaf;

pub use branch::BranchNode;
pub use extension::ExtensionNode;
pub use leaf::LeafNode;

use meridian_common::Digest;
use sha3::{Digest as _, Keccak256};

use crate::{
    codec::MAX_NODE_SIZE,
    db::TrieDB,
    error::TrieError,
    nibbles::Nibbles,
};

/// A reference to a child (or root) subtrie.
///
/// This is the "collapsed vs loaded" axis called for in the crate's
/// design notes: rather than a `Node` subclass, it's a second enum
/// nested inside every variant that owns children.
#[derive(Debug, Clone)]
pub enum NodeRef {
    /// No child in this slot.
    Empty,
    /// The child was committed; only its digest is kept in memory.
    Collapsed(Digest),
    /// The child is fully materialized in memory (freshly inserted, or
    /// loaded from storage by a prior traversal).
    Loaded(Box<Node>),
}

impl NodeRef {
    pub fn is_empty(&self) -> bool {
        matches!(self, NodeRef::Empty)
    }

    /// Digest this reference resolves to, recomputing from the in-memory
    /// node if necessary. Never touches storage: a dirty node is always
    /// `Loaded`, and a clean one always carries its own cached hash.
    pub(crate) fn digest(&self) -> Digest {
        match self {
            NodeRef::Empty => Digest::zero(),
            NodeRef::Collapsed(digest) => *digest,
            NodeRef::Loaded(node) => node.hash_or_compute(),
        }
    }
}

/// A node in the trie: branch, extension or leaf, each carrying its own
/// `hash` cache. A node is dirty exactly when `hash` is `None`
/// (invariant 1) — there is deliberately no separate `dirty` flag to go
/// out of sync with it.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafNode),
    Extension(ExtensionNode),
    Branch(Box<BranchNode>),
}

impl From<LeafNode> for Node {
    fn from(value: LeafNode) -> Self {
        Node::Leaf(value)
    }
}

impl From<ExtensionNode> for Node {
    fn from(value: ExtensionNode) -> Self {
        Node::Extension(value)
    }
}

impl From<BranchNode> for Node {
    fn from(value: BranchNode) -> Self {
        Node::Branch(Box::new(value))
    }
}

impl Node {
    pub fn hash(&self) -> Option<Digest> {
        match self {
            Node::Leaf(n) => n.hash,
            Node::Extension(n) => n.hash,
            Node::Branch(n) => n.hash,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.hash().is_none()
    }

    fn set_hash(&mut self, hash: Digest) {
        match self {
            Node::Leaf(n) => n.hash = Some(hash),
            Node::Extension(n) => n.hash = Some(hash),
            Node::Branch(n) => n.hash = Some(hash),
        }
    }

    /// Returns the node's hash, computing and caching it bottom-up for
    /// any dirty descendants. Pure w.r.t. storage: dirty nodes are
    /// always loaded in memory already, so this never needs to read the
    /// KV store. This backs `Trie::root_hash` and `Trie::prove`, both of
    /// which must not touch storage.
    pub fn hash_or_compute(&self) -> Digest {
        if let Some(hash) = self.hash() {
            return hash;
        }
        keccak(&self.serialize())
    }

    /// Serializes this node's logical content. Requires that any dirty
    /// children already have a computable hash (via `hash_or_compute`);
    /// does not require children to be loaded vs. collapsed.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Node::Leaf(n) => n.serialize(),
            Node::Extension(n) => n.serialize(),
            Node::Branch(n) => n.serialize(),
        }
    }

    pub fn decode(bytes: &[u8], known_hash: Digest) -> Result<Node, TrieError> {
        use crate::codec::{read_tag, TAG_BRANCH, TAG_EXTENSION, TAG_LEAF};

        let mut pos = 0usize;
        let tag = read_tag(bytes, &mut pos)?;
        let mut node = match tag {
            TAG_LEAF => Node::Leaf(LeafNode::decode_body(bytes, &mut pos)?),
            TAG_EXTENSION => Node::Extension(ExtensionNode::decode_body(bytes, &mut pos)?),
            TAG_BRANCH => Node::Branch(Box::new(BranchNode::decode_body(bytes, &mut pos)?)),
            other => return Err(TrieError::Decode(format!("unknown node tag {other}"))),
        };
        node.set_hash(known_hash);
        Ok(node)
    }

    pub fn get(&self, path: Nibbles, store: &dyn TrieDB) -> Result<Option<Vec<u8>>, TrieError> {
        match self {
            Node::Leaf(n) => Ok(n.get(&path)),
            Node::Extension(n) => n.get(path, store),
            Node::Branch(n) => n.get(path, store),
        }
    }

    pub fn insert(
        self,
        path: Nibbles,
        value: Vec<u8>,
        store: &dyn TrieDB,
    ) -> Result<Node, TrieError> {
        match self {
            Node::Leaf(n) => n.insert(path, value),
            Node::Extension(n) => n.insert(path, value, store),
            Node::Branch(n) => n.insert(path, value, store),
        }
    }

    pub fn remove(
        self,
        path: Nibbles,
        store: &dyn TrieDB,
    ) -> Result<(Option<Node>, Option<Vec<u8>>), TrieError> {
        match self {
            Node::Leaf(n) => Ok(n.remove(path)),
            Node::Extension(n) => n.remove(path, store),
            Node::Branch(n) => n.remove(path, store),
        }
    }

    pub fn get_path(
        &self,
        path: Nibbles,
        store: &dyn TrieDB,
        acc: &mut Vec<Vec<u8>>,
    ) -> Result<(), TrieError> {
        acc.push(self.serialize());
        match self {
            Node::Leaf(_) => Ok(()),
            Node::Extension(n) => n.get_path(path, store, acc),
            Node::Branch(n) => n.get_path(path, store, acc),
        }
    }

    pub fn collect_leaves(
        &self,
        store: &dyn TrieDB,
        prefix: &mut Vec<u8>,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<(), TrieError> {
        match self {
            Node::Leaf(n) => {
                n.collect_leaves(prefix, out);
                Ok(())
            }
            Node::Extension(n) => n.collect_leaves(store, prefix, out),
            Node::Branch(n) => n.collect_leaves(store, prefix, out),
        }
    }

    /// Recursively computes hashes for every dirty node reachable from
    /// `self`, serializes each one, and appends `(hash, bytes)` to
    /// `writes`. Returns the (now-clean) hash of `self`. Collapses every
    /// child it touches — whether that child was itself dirty or simply
    /// loaded — once its hash has been folded in, per the "commit drops
    /// loaded children" rule.
    pub fn commit_collect(
        &mut self,
        store: &dyn TrieDB,
        writes: &mut Vec<(Digest, Vec<u8>)>,
    ) -> Result<Digest, TrieError> {
        if let Some(hash) = self.hash() {
            return Ok(hash);
        }

        match self {
            Node::Leaf(_) => {}
            Node::Extension(n) => n.commit_children(store, writes)?,
            Node::Branch(n) => n.commit_children(store, writes)?,
        }

        let encoded = self.serialize();
        if encoded.len() > MAX_NODE_SIZE {
            return Err(TrieError::SerializationOverflow);
        }
        let hash = keccak(&encoded);
        writes.push((hash, encoded));
        self.set_hash(hash);
        Ok(hash)
    }
}

/// Resolves a reference into an owned node, deserializing from storage
/// if it's collapsed. Used by mutating traversals (`insert`/`remove`),
/// which need ownership to recurse and rebuild the path.
pub(crate) fn resolve(node_ref: NodeRef, store: &dyn TrieDB) -> Result<Node, TrieError> {
    match node_ref {
        NodeRef::Loaded(node) => Ok(*node),
        NodeRef::Collapsed(digest) => {
            let bytes = store
                .get(digest)?
                .ok_or(TrieError::MissingNode(digest))?;
            Node::decode(&bytes, digest)
        }
        NodeRef::Empty => unreachable!("cannot resolve an empty trie slot"),
    }
}

/// Read-only traversal into a child reference: runs `f` against the
/// referenced node without taking ownership of it, loading a transient
/// copy from storage for collapsed children.
pub(crate) fn with_child<T>(
    node_ref: &NodeRef,
    store: &dyn TrieDB,
    f: impl FnOnce(&Node, &dyn TrieDB) -> Result<T, TrieError>,
    default: T,
) -> Result<T, TrieError> {
    match node_ref {
        NodeRef::Empty => Ok(default),
        NodeRef::Loaded(node) => f(node, store),
        NodeRef::Collapsed(digest) => {
            let bytes = store
                .get(*digest)?
                .ok_or(TrieError::MissingNode(*digest))?;
            let node = Node::decode(&bytes, *digest)?;
            f(&node, store)
        }
    }
}

pub fn keccak(bytes: &[u8]) -> Digest {
    Digest::from_slice(Keccak256::digest(bytes).as_slice())
}
