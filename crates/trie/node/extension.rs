use meridian_common::Digest;

use crate::{
    codec::{read_bytes, read_digest, write_bytes, write_digest, TAG_EXTENSION},
    db::TrieDB,
    error::TrieError,
    nibbles::Nibbles,
};

use super::{leaf::place_in_branch, resolve, with_child, BranchNode, Node, NodeRef};

#[derive(Debug, Clone)]
pub struct ExtensionNode {
    /// Shared key fragment. Never empty, never carries the terminator
    /// (invariant 3): a shared terminator would mean the two diverging
    /// keys were actually identical.
    pub key: Nibbles,
    pub child: NodeRef,
    pub hash: Option<Digest>,
}

impl ExtensionNode {
    pub fn new(key: Nibbles, child: NodeRef) -> Self {
        Self { key, child, hash: None }
    }

    pub fn get(&self, path: Nibbles, store: &dyn TrieDB) -> Result<Option<Vec<u8>>, TrieError> {
        let common = self.key.common_prefix_len(&path);
        if common < self.key.len() {
            return Ok(None);
        }
        with_child(
            &self.child,
            store,
            |node, store| node.get(path.skip(common), store),
            None,
        )
    }

    pub fn insert(
        self,
        path: Nibbles,
        value: Vec<u8>,
        store: &dyn TrieDB,
    ) -> Result<Node, TrieError> {
        let common = self.key.common_prefix_len(&path);

        if common == self.key.len() {
            let child = resolve(self.child, store)?;
            let new_child = child.insert(path.skip(common), value, store)?;
            return Ok(Node::Extension(ExtensionNode::new(
                self.key,
                NodeRef::Loaded(Box::new(new_child)),
            )));
        }

        let ext_rest = self.key.skip(common);
        let path_rest = path.skip(common);
        let mut branch = BranchNode::empty();

        let ext_slot = ext_rest.at(0) as usize;
        let ext_child_fragment = ext_rest.skip(1);
        branch.children[ext_slot] = if ext_child_fragment.is_empty() {
            self.child
        } else {
            NodeRef::Loaded(Box::new(Node::Extension(ExtensionNode::new(
                ext_child_fragment,
                self.child,
            ))))
        };

        place_in_branch(&mut branch, path_rest, value);

        let branch_node = Node::Branch(Box::new(branch));
        if common == 0 {
            Ok(branch_node)
        } else {
            Ok(Node::Extension(ExtensionNode::new(
                self.key.take(common),
                NodeRef::Loaded(Box::new(branch_node)),
            )))
        }
    }

    pub fn remove(
        self,
        path: Nibbles,
        store: &dyn TrieDB,
    ) -> Result<(Option<Node>, Option<Vec<u8>>), TrieError> {
        let common = self.key.common_prefix_len(&path);
        if common < self.key.len() {
            return Ok((Some(Node::Extension(self)), None));
        }

        let child = resolve(self.child, store)?;
        let (new_child, removed) = child.remove(path.skip(common), store)?;

        let Some(new_child) = new_child else {
            return Ok((None, removed));
        };
        if removed.is_none() {
            // Key wasn't found below; child is logically unchanged.
            return Ok((
                Some(Node::Extension(ExtensionNode::new(
                    self.key,
                    NodeRef::Loaded(Box::new(new_child)),
                ))),
                None,
            ));
        }

        let merged = match new_child {
            Node::Extension(mut child_ext) => {
                child_ext.key = self.key.concat(&child_ext.key);
                child_ext.hash = None;
                Node::Extension(child_ext)
            }
            Node::Leaf(mut leaf) => {
                leaf.key = self.key.concat(&leaf.key);
                leaf.hash = None;
                Node::Leaf(leaf)
            }
            branch @ Node::Branch(_) => Node::Extension(ExtensionNode::new(
                self.key,
                NodeRef::Loaded(Box::new(branch)),
            )),
        };
        Ok((Some(merged), removed))
    }

    pub fn get_path(
        &self,
        path: Nibbles,
        store: &dyn TrieDB,
        acc: &mut Vec<Vec<u8>>,
    ) -> Result<(), TrieError> {
        let common = self.key.common_prefix_len(&path);
        if common < self.key.len() {
            return Ok(());
        }
        super::with_child(
            &self.child,
            store,
            |node, store| node.get_path(path.skip(common), store, acc),
            (),
        )
    }

    pub fn collect_leaves(
        &self,
        store: &dyn TrieDB,
        prefix: &mut Vec<u8>,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<(), TrieError> {
        let extra = self.key.len();
        for i in 0..extra {
            prefix.push(self.key.at(i));
        }
        let result = match &self.child {
            NodeRef::Empty => Ok(()),
            NodeRef::Loaded(node) => node.collect_leaves(store, prefix, out),
            NodeRef::Collapsed(digest) => {
                let bytes = store
                    .get(*digest)?
                    .ok_or(TrieError::MissingNode(*digest))?;
                Node::decode(&bytes, *digest)?.collect_leaves(store, prefix, out)
            }
        };
        prefix.truncate(prefix.len() - extra);
        result
    }

    pub fn commit_children(
        &mut self,
        store: &dyn TrieDB,
        writes: &mut Vec<(Digest, Vec<u8>)>,
    ) -> Result<(), TrieError> {
        if let NodeRef::Loaded(child) = &mut self.child {
            let hash = child.commit_collect(store, writes)?;
            self.child = NodeRef::Collapsed(hash);
        }
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![TAG_EXTENSION];
        write_bytes(&mut out, &self.key.encode_compact());
        write_digest(&mut out, &self.child.digest());
        out
    }

    pub(super) fn decode_body(buf: &[u8], pos: &mut usize) -> Result<Self, TrieError> {
        let key = Nibbles::decode_compact(read_bytes(buf, pos)?);
        let child_hash = read_digest(buf, pos)?;
        let child = if child_hash == Digest::zero() {
            NodeRef::Empty
        } else {
            NodeRef::Collapsed(child_hash)
        };
        Ok(Self { key, child, hash: None })
    }
}
