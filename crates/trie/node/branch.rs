use meridian_common::Digest;
use smallvec::smallvec;

use crate::{
    codec::{read_bytes, read_digest, write_bytes, write_digest, TAG_BRANCH},
    db::TrieDB,
    error::TrieError,
    nibbles::{Nibbles, TERMINATOR},
};

use super::{resolve, with_child, ExtensionNode, LeafNode, Node, NodeRef};

/// 16 nibble-indexed child slots plus an optional value for keys that
/// terminate exactly at this branch. The spec's textual 17-slot array
/// (with slot 16 holding "a value") is modeled here as 16 children plus
/// a dedicated `value` field rather than a uniform array whose last
/// element has a different type than the rest.
#[derive(Debug, Clone)]
pub struct BranchNode {
    pub children: [NodeRef; 16],
    pub value: Option<Vec<u8>>,
    pub hash: Option<Digest>,
}

impl BranchNode {
    pub fn empty() -> Self {
        Self {
            children: std::array::from_fn(|_| NodeRef::Empty),
            value: None,
            hash: None,
        }
    }

    pub fn get(&self, path: Nibbles, store: &dyn TrieDB) -> Result<Option<Vec<u8>>, TrieError> {
        if path.len() == 1 && path.at(0) == TERMINATOR {
            return Ok(self.value.clone());
        }
        let slot = path.at(0) as usize;
        with_child(
            &self.children[slot],
            store,
            |node, store| node.get(path.skip(1), store),
            None,
        )
    }

    pub fn insert(
        mut self,
        path: Nibbles,
        value: Vec<u8>,
        store: &dyn TrieDB,
    ) -> Result<Node, TrieError> {
        if path.len() == 1 && path.at(0) == TERMINATOR {
            self.value = Some(value);
            self.hash = None;
            return Ok(Node::Branch(Box::new(self)));
        }

        let slot = path.at(0) as usize;
        let rest = path.skip(1);
        let existing = std::mem::replace(&mut self.children[slot], NodeRef::Empty);
        let new_child = match existing {
            NodeRef::Empty => Node::Leaf(LeafNode::new(rest, value)),
            other => resolve(other, store)?.insert(rest, value, store)?,
        };
        self.children[slot] = NodeRef::Loaded(Box::new(new_child));
        self.hash = None;
        Ok(Node::Branch(Box::new(self)))
    }

    pub fn remove(
        mut self,
        path: Nibbles,
        store: &dyn TrieDB,
    ) -> Result<(Option<Node>, Option<Vec<u8>>), TrieError> {
        if path.len() == 1 && path.at(0) == TERMINATOR {
            let Some(removed) = self.value.take() else {
                self.value = None;
                return Ok((Some(Node::Branch(Box::new(self))), None));
            };
            return finalize_after_removal(self, Some(removed), store);
        }

        let slot = path.at(0) as usize;
        if self.children[slot].is_empty() {
            return Ok((Some(Node::Branch(Box::new(self))), None));
        }

        let existing = std::mem::replace(&mut self.children[slot], NodeRef::Empty);
        let child = resolve(existing, store)?;
        let (new_child, removed) = child.remove(path.skip(1), store)?;

        self.children[slot] = match new_child {
            None => NodeRef::Empty,
            Some(n) => NodeRef::Loaded(Box::new(n)),
        };

        if removed.is_none() {
            return Ok((Some(Node::Branch(Box::new(self))), None));
        }
        finalize_after_removal(self, removed, store)
    }

    pub fn get_path(
        &self,
        path: Nibbles,
        store: &dyn TrieDB,
        acc: &mut Vec<Vec<u8>>,
    ) -> Result<(), TrieError> {
        if path.len() == 1 && path.at(0) == TERMINATOR {
            return Ok(());
        }
        let slot = path.at(0) as usize;
        super::with_child(
            &self.children[slot],
            store,
            |node, store| node.get_path(path.skip(1), store, acc),
            (),
        )
    }

    pub fn collect_leaves(
        &self,
        store: &dyn TrieDB,
        prefix: &mut Vec<u8>,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<(), TrieError> {
        if let Some(value) = &self.value {
            out.push((
                Nibbles::from_hex(prefix.iter().copied().collect()).to_bytes(),
                value.clone(),
            ));
        }
        for (slot, child) in self.children.iter().enumerate() {
            if child.is_empty() {
                continue;
            }
            prefix.push(slot as u8);
            let result = match child {
                NodeRef::Empty => unreachable!("checked above"),
                NodeRef::Loaded(node) => node.collect_leaves(store, prefix, out),
                NodeRef::Collapsed(digest) => {
                    let bytes = store
                        .get(*digest)?
                        .ok_or(TrieError::MissingNode(*digest))?;
                    Node::decode(&bytes, *digest)?.collect_leaves(store, prefix, out)
                }
            };
            prefix.pop();
            result?;
        }
        Ok(())
    }

    pub fn commit_children(
        &mut self,
        store: &dyn TrieDB,
        writes: &mut Vec<(Digest, Vec<u8>)>,
    ) -> Result<(), TrieError> {
        for child in &mut self.children {
            if let NodeRef::Loaded(node) = child {
                let hash = node.commit_collect(store, writes)?;
                *child = NodeRef::Collapsed(hash);
            }
        }
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![TAG_BRANCH];
        for child in &self.children {
            write_digest(&mut out, &child.digest());
        }
        match &self.value {
            Some(value) => {
                out.push(1);
                write_bytes(&mut out, value);
            }
            None => out.push(0),
        }
        out
    }

    pub(super) fn decode_body(buf: &[u8], pos: &mut usize) -> Result<Self, TrieError> {
        let mut children: [NodeRef; 16] = std::array::from_fn(|_| NodeRef::Empty);
        for child in &mut children {
            let digest = read_digest(buf, pos)?;
            *child = if digest == Digest::zero() {
                NodeRef::Empty
            } else {
                NodeRef::Collapsed(digest)
            };
        }
        let has_value = *buf
            .get(*pos)
            .ok_or_else(|| TrieError::Decode("truncated branch value flag".into()))?;
        *pos += 1;
        let value = if has_value == 1 {
            Some(read_bytes(buf, pos)?.to_vec())
        } else {
            None
        };
        Ok(Self { children, value, hash: None })
    }
}

/// After a removal, collapses this branch if it's left with fewer than
/// two non-empty slots (invariant 4), merging the sole survivor with its
/// parent the way a leaf or extension split does, in reverse.
fn finalize_after_removal(
    mut branch: BranchNode,
    removed: Option<Vec<u8>>,
    store: &dyn TrieDB,
) -> Result<(Option<Node>, Option<Vec<u8>>), TrieError> {
    branch.hash = None;

    let occupied: Vec<usize> = branch
        .children
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_empty())
        .map(|(i, _)| i)
        .collect();
    let has_value = branch.value.is_some();

    match (occupied.len(), has_value) {
        (0, false) => Ok((None, removed)),
        (0, true) => {
            let leaf = LeafNode::new(
                Nibbles::from_hex(smallvec![TERMINATOR]),
                branch.value.take().expect("checked has_value"),
            );
            Ok((Some(Node::Leaf(leaf)), removed))
        }
        (1, false) => {
            let slot = occupied[0];
            let child_ref = std::mem::replace(&mut branch.children[slot], NodeRef::Empty);
            let child = resolve(child_ref, store)?;
            let merged = match child {
                Node::Leaf(mut leaf) => {
                    leaf.key = leaf.key.prepend(slot as u8);
                    leaf.hash = None;
                    Node::Leaf(leaf)
                }
                Node::Extension(mut ext) => {
                    ext.key = ext.key.prepend(slot as u8);
                    ext.hash = None;
                    Node::Extension(ext)
                }
                inner @ Node::Branch(_) => Node::Extension(ExtensionNode::new(
                    Nibbles::from_hex(smallvec![slot as u8]),
                    NodeRef::Loaded(Box::new(inner)),
                )),
            };
            Ok((Some(merged), removed))
        }
        _ => Ok((Some(Node::Branch(Box::new(branch))), removed)),
    }
}
