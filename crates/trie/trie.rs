//! A Modified Patricia-Merkle Trie: deterministic root hashes, lazy
//! loading of collapsed subtrees from a [`TrieDB`], and Merkle proof
//! generation/verification.
//!
//! ```text
//! hash == None            <=>  node is dirty and lives only in memory
//! NodeRef::Collapsed(h)   <=>  node is clean; only its digest is held
//! NodeRef::Loaded(node)   <=>  node is materialized (dirty or not)
//! ```
//!
//! A branch needs at least two occupied slots (counting its own value)
//! once a delete finishes; fewer and it collapses into its surviving
//! child, merging key fragments the way a leaf/extension split does in
//! reverse. `root_hash`/`prove` never touch storage: any dirty node is,
//! by construction, already loaded in memory.

pub mod codec;
pub mod db;
pub mod error;
pub mod nibbles;
pub mod node;

use std::sync::Arc;

use lazy_static::lazy_static;
use meridian_common::Digest;

pub use db::{InMemoryTrieDB, TrieDB};
pub use error::TrieError;
pub use node::{BranchNode, ExtensionNode, LeafNode, Node, NodeRef};

use nibbles::{Nibbles, TERMINATOR};

lazy_static! {
    /// Root hash of a trie holding no key-value pairs: the all-zero
    /// digest, not the hash of the empty byte string. `Trie::new` and a
    /// fully-collapsed-by-deletion trie both report this value from
    /// `root_hash`, matching `NodeRef::Empty`'s own digest.
    pub static ref EMPTY_TRIE_HASH: Digest = Digest::zero();
}

/// A single trie instance. Not `Sync`-safe to mutate from multiple
/// threads at once — per the crate's concurrency notes, a trie is owned
/// by exactly one worker while it's being built; the backing [`TrieDB`]
/// may still be shared and read concurrently by others.
pub struct Trie {
    root: NodeRef,
    db: Arc<dyn TrieDB>,
}

impl Trie {
    /// A fresh, empty trie backed by `db`.
    pub fn new(db: Arc<dyn TrieDB>) -> Self {
        Self { root: NodeRef::Empty, db }
    }

    /// Rebuilds a trie handle from a previously committed root digest.
    /// Does not walk the tree: the root starts out collapsed and is
    /// loaded lazily as lookups and mutations touch it.
    pub fn open(db: Arc<dyn TrieDB>, root_hash: Digest) -> Self {
        let root = if root_hash == *EMPTY_TRIE_HASH {
            NodeRef::Empty
        } else {
            NodeRef::Collapsed(root_hash)
        };
        Self { root, db }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = Nibbles::from_bytes(key);
        node::with_child(&self.root, self.db.as_ref(), |node, store| node.get(path, store), None)
    }

    /// Inserts `value` at `key`. An empty value is treated as a delete
    /// (and is a no-op if the key isn't present), matching the
    /// preprocessor's convention for "no value here" writes.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        if value.is_empty() {
            return self.delete(key);
        }
        let path = Nibbles::from_bytes(key);
        let root = std::mem::replace(&mut self.root, NodeRef::Empty);
        let new_root = match root {
            NodeRef::Empty => Node::Leaf(LeafNode::new(path, value)),
            other => node::resolve(other, self.db.as_ref())?.insert(path, value, self.db.as_ref())?,
        };
        self.root = NodeRef::Loaded(Box::new(new_root));
        Ok(())
    }

    /// Removes `key`. A missing key is a no-op, not an error.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        let path = Nibbles::from_bytes(key);
        let root = std::mem::replace(&mut self.root, NodeRef::Empty);
        self.root = match root {
            NodeRef::Empty => NodeRef::Empty,
            other => {
                let node = node::resolve(other, self.db.as_ref())?;
                let (new_root, _removed) = node.remove(path, self.db.as_ref())?;
                match new_root {
                    Some(n) => NodeRef::Loaded(Box::new(n)),
                    None => NodeRef::Empty,
                }
            }
        };
        Ok(())
    }

    /// Root hash of the current in-memory state. Purely functional: it
    /// recomputes hashes for dirty nodes on the fly without memoizing
    /// them or touching the backing store, and without requiring `&mut
    /// self`. Only [`Self::commit`] ever caches a node's hash.
    pub fn root_hash(&self) -> Digest {
        match &self.root {
            NodeRef::Empty => *EMPTY_TRIE_HASH,
            other => other.digest(),
        }
    }

    /// Writes every dirty node reachable from the root to the backing
    /// store in one batch and returns the resulting root hash. A no-op
    /// (beyond recomputing the already-cached hash) if nothing changed
    /// since the last commit.
    pub fn commit(&mut self) -> Result<Digest, TrieError> {
        match &mut self.root {
            NodeRef::Empty => Ok(*EMPTY_TRIE_HASH),
            NodeRef::Collapsed(hash) => Ok(*hash),
            NodeRef::Loaded(node) => {
                let mut writes = Vec::new();
                let hash = node.commit_collect(self.db.as_ref(), &mut writes)?;
                self.db.put_batch(writes)?;
                self.root = NodeRef::Collapsed(hash);
                Ok(hash)
            }
        }
    }

    /// Builds a Merkle proof: the root-to-leaf chain of raw encoded
    /// nodes for `key`, in descent order. Errors only on an empty trie;
    /// a proof of absence for a present-trie, missing key is a valid,
    /// shorter chain that [`Self::verify_proof`] will reject.
    pub fn prove(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, TrieError> {
        if matches!(self.root, NodeRef::Empty) {
            return Err(TrieError::NilNode);
        }
        let path = Nibbles::from_bytes(key);
        let mut acc = Vec::new();
        node::with_child(
            &self.root,
            self.db.as_ref(),
            |node, store| node.get_path(path, store, &mut acc),
            (),
        )?;
        Ok(acc)
    }

    /// Verifies `proof` proves `key` against this trie's current root.
    pub fn verify(&self, proof: &[Vec<u8>], key: &[u8]) -> bool {
        verify_proof(self.root_hash(), proof, key)
    }

    /// Structurally independent copy of the in-memory node graph: later
    /// mutations on either trie never affect the other. Collapsed
    /// subtrees are cheap to "copy" since they're just digests, and both
    /// copies keep reading from the same backing store.
    pub fn deep_clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            db: Arc::clone(&self.db),
        }
    }

    /// Every `(key, value)` pair currently reachable from the root, in
    /// no particular order. Loads any collapsed subtrees it needs to
    /// walk, but performs no writes.
    pub fn get_all_leaves(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TrieError> {
        let mut out = Vec::new();
        if matches!(self.root, NodeRef::Empty) {
            return Ok(out);
        }
        let mut prefix = Vec::new();
        node::with_child(
            &self.root,
            self.db.as_ref(),
            |node, store| node.collect_leaves(store, &mut prefix, &mut out),
            (),
        )?;
        Ok(out)
    }
}

/// Verifies a proof chain produced by [`Trie::prove`] against an
/// expected root hash, without needing the trie or its store at all.
/// Malformed input (bad hashes, truncated chains, corrupt encodings)
/// yields `false`, never an error.
pub fn verify_proof(root: Digest, proof: &[Vec<u8>], key: &[u8]) -> bool {
    if proof.is_empty() {
        return false;
    }

    let mut expected = root;
    let mut remaining = Nibbles::from_bytes(key);

    for encoded in proof {
        if node::keccak(encoded) != expected {
            return false;
        }
        let decoded = match Node::decode(encoded, expected) {
            Ok(n) => n,
            Err(_) => return false,
        };
        match decoded {
            Node::Leaf(leaf) => return leaf.key == remaining,
            Node::Extension(ext) => {
                if remaining.common_prefix_len(&ext.key) < ext.key.len() {
                    return false;
                }
                remaining = remaining.skip(ext.key.len());
                match ext.child {
                    NodeRef::Collapsed(d) => expected = d,
                    _ => return false,
                }
            }
            Node::Branch(branch) => {
                if remaining.len() == 1 && remaining.at(0) == TERMINATOR {
                    return branch.value.is_some();
                }
                let slot = remaining.at(0) as usize;
                match branch.children[slot] {
                    NodeRef::Collapsed(d) => {
                        expected = d;
                        remaining = remaining.skip(1);
                    }
                    _ => return false,
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_trie() -> Trie {
        Trie::new(Arc::new(InMemoryTrieDB::new()))
    }

    #[test]
    fn empty_trie_root_is_the_zero_digest_not_keccak_of_nothing() {
        let trie = new_trie();
        assert_eq!(trie.root_hash(), Digest::zero());
        assert_ne!(trie.root_hash(), node::keccak(&[]));
    }

    #[test]
    fn open_with_a_zero_or_empty_digest_recreates_an_empty_trie() {
        let db = Arc::new(InMemoryTrieDB::new());
        let mut opened = Trie::open(Arc::clone(&db) as Arc<dyn TrieDB>, Digest::zero());
        assert_eq!(opened.root_hash(), Digest::zero());
        assert_eq!(opened.get(b"anything").unwrap(), None);

        opened.update(b"dog", b"puppy".to_vec()).unwrap();
        assert_eq!(opened.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
    }

    #[test]
    fn insert_commit_recreate_roundtrip() {
        let mut trie = new_trie();
        trie.update(b"do", b"verb".to_vec()).unwrap();
        trie.update(b"dog", b"puppy".to_vec()).unwrap();
        trie.update(b"doge", b"coin".to_vec()).unwrap();
        trie.update(b"horse", b"stallion".to_vec()).unwrap();
        let root = trie.commit().unwrap();

        let db = Arc::clone(&trie.db);
        let reopened = Trie::open(db, root);
        assert_eq!(reopened.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(reopened.get(b"doge").unwrap(), Some(b"coin".to_vec()));
        assert_eq!(reopened.get(b"horse").unwrap(), Some(b"stallion".to_vec()));
        assert_eq!(reopened.get(b"nonexistent").unwrap(), None);
    }

    #[test]
    fn delete_then_reinsert_recovers_original_root() {
        let mut trie = new_trie();
        trie.update(b"dog", b"puppy".to_vec()).unwrap();
        trie.update(b"doge", b"coin".to_vec()).unwrap();
        let root1 = trie.commit().unwrap();

        trie.update(b"horse", b"stallion".to_vec()).unwrap();
        let root2 = trie.commit().unwrap();
        assert_ne!(root1, root2);

        trie.delete(b"horse").unwrap();
        let root3 = trie.commit().unwrap();
        assert_eq!(root1, root3);
    }

    #[test]
    fn commit_is_a_no_op_when_nothing_changed() {
        let mut trie = new_trie();
        trie.update(b"dog", b"puppy".to_vec()).unwrap();
        let root1 = trie.commit().unwrap();
        let root2 = trie.commit().unwrap();
        assert_eq!(root1, root2);
    }

    #[test]
    fn proof_for_present_key_verifies() {
        let mut trie = new_trie();
        trie.update(b"do", b"verb".to_vec()).unwrap();
        trie.update(b"dog", b"puppy".to_vec()).unwrap();
        trie.update(b"doge", b"coin".to_vec()).unwrap();
        trie.update(b"horse", b"stallion".to_vec()).unwrap();

        let proof = trie.prove(b"dog").unwrap();
        assert!(trie.verify(&proof, b"dog"));
        assert!(!trie.verify(&proof, b"cat"));
    }

    #[test]
    fn proof_does_not_verify_against_a_different_trie() {
        let mut t1 = new_trie();
        t1.update(b"do", b"verb".to_vec()).unwrap();
        t1.update(b"dog", b"puppy".to_vec()).unwrap();

        let mut t2 = new_trie();
        t2.update(b"do", b"verb".to_vec()).unwrap();
        t2.update(b"dog", b"puppy".to_vec()).unwrap();
        t2.update(b"doge", b"coin".to_vec()).unwrap();
        t2.update(b"dogglesworth", b"cat".to_vec()).unwrap();

        let proof_from_t2 = t2.prove(b"dogglesworth").unwrap();
        assert!(!t1.verify(&proof_from_t2, b"dogglesworth"));
    }

    #[test]
    fn prove_on_empty_trie_errors() {
        let trie = new_trie();
        assert!(matches!(trie.prove(b"dog"), Err(TrieError::NilNode)));
    }

    #[test]
    fn deep_clone_mutations_are_independent() {
        let mut trie = new_trie();
        trie.update(b"dog", b"puppy".to_vec()).unwrap();
        let root = trie.commit().unwrap();

        let mut clone = trie.deep_clone();
        clone.update(b"cat", b"meow".to_vec()).unwrap();

        assert_eq!(trie.root_hash(), root);
        assert_ne!(clone.root_hash(), root);
        assert_eq!(trie.get(b"cat").unwrap(), None);
        assert_eq!(clone.get(b"cat").unwrap(), Some(b"meow".to_vec()));
    }

    #[test]
    fn insertion_order_does_not_affect_root_hash() {
        let mut a = new_trie();
        a.update(b"dog", b"puppy".to_vec()).unwrap();
        a.update(b"doge", b"coin".to_vec()).unwrap();
        a.update(b"horse", b"stallion".to_vec()).unwrap();

        let mut b = new_trie();
        b.update(b"horse", b"stallion".to_vec()).unwrap();
        b.update(b"doge", b"coin".to_vec()).unwrap();
        b.update(b"dog", b"puppy".to_vec()).unwrap();

        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn get_all_leaves_recovers_every_key() {
        let mut trie = new_trie();
        trie.update(b"dog", b"puppy".to_vec()).unwrap();
        trie.update(b"doge", b"coin".to_vec()).unwrap();
        trie.update(b"horse", b"stallion".to_vec()).unwrap();

        let mut leaves = trie.get_all_leaves().unwrap();
        leaves.sort();
        let mut expected = vec![
            (b"dog".to_vec(), b"puppy".to_vec()),
            (b"doge".to_vec(), b"coin".to_vec()),
            (b"horse".to_vec(), b"stallion".to_vec()),
        ];
        expected.sort();
        assert_eq!(leaves, expected);
    }
}
