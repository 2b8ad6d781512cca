use meridian_common::Digest;

use crate::{
    codec::{read_bytes, write_bytes, TAG_LEAF},
    error::TrieError,
    nibbles::Nibbles,
};

use super::Node;

#[derive(Debug, Clone)]
pub struct LeafNode {
    /// Remaining nibble path to this value, terminator included.
    pub key: Nibbles,
    pub value: Vec<u8>,
    pub hash: Option<Digest>,
}

impl LeafNode {
    pub fn new(key: Nibbles, value: Vec<u8>) -> Self {
        Self { key, value, hash: None }
    }

    pub fn get(&self, path: &Nibbles) -> Option<Vec<u8>> {
        if self.key == *path {
            Some(self.value.clone())
        } else {
            None
        }
    }

    pub fn insert(self, path: Nibbles, value: Vec<u8>) -> Result<Node, TrieError> {
        let common = self.key.common_prefix_len(&path);

        if common == self.key.len() && common == path.len() {
            return Ok(Node::Leaf(LeafNode::new(self.key, value)));
        }

        let self_rest = self.key.skip(common);
        let path_rest = path.skip(common);
        let mut branch = super::BranchNode::empty();

        place_in_branch(&mut branch, self_rest, self.value);
        place_in_branch(&mut branch, path_rest, value);

        let branch_node = Node::Branch(Box::new(branch));
        if common == 0 {
            Ok(branch_node)
        } else {
            Ok(Node::Extension(super::ExtensionNode::new(
                path.take(common),
                super::NodeRef::Loaded(Box::new(branch_node)),
            )))
        }
    }

    pub fn remove(self, path: Nibbles) -> (Option<Node>, Option<Vec<u8>>) {
        if self.key == path {
            (None, Some(self.value))
        } else {
            (Some(Node::Leaf(self)), None)
        }
    }

    pub fn collect_leaves(&self, prefix: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
        let extra = self.key.len_without_terminator();
        for i in 0..extra {
            prefix.push(self.key.at(i));
        }
        out.push((Nibbles::from_hex(prefix.iter().copied().collect()).to_bytes(), self.value.clone()));
        prefix.truncate(prefix.len() - extra);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![TAG_LEAF];
        write_bytes(&mut out, &self.key.encode_compact());
        write_bytes(&mut out, &self.value);
        out
    }

    pub(super) fn decode_body(buf: &[u8], pos: &mut usize) -> Result<Self, TrieError> {
        let key = Nibbles::decode_compact(read_bytes(buf, pos)?);
        let value = read_bytes(buf, pos)?.to_vec();
        Ok(Self { key, value, hash: None })
    }
}

/// Places a leftover key fragment (from a split leaf or the new
/// insertion) into the branch being built: as the branch's own value if
/// the fragment is bare terminator, otherwise as a fresh leaf child.
pub(super) fn place_in_branch(branch: &mut super::BranchNode, rest: Nibbles, value: Vec<u8>) {
    if rest.len() == 1 && rest.at(0) == crate::nibbles::TERMINATOR {
        branch.value = Some(value);
    } else {
        let slot = rest.at(0) as usize;
        branch.children[slot] =
            super::NodeRef::Loaded(Box::new(Node::Leaf(LeafNode::new(rest.skip(1), value))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_replaces_value() {
        let leaf = LeafNode::new(Nibbles::from_bytes(b"dog"), b"v1".to_vec());
        let updated = leaf.insert(Nibbles::from_bytes(b"dog"), b"v2".to_vec()).unwrap();
        match updated {
            Node::Leaf(l) => assert_eq!(l.value, b"v2"),
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn diverging_key_splits_into_branch() {
        // "dog" and "cat" share no byte-level prefix but do share one
        // nibble (both start with high nibble 0x6), so the split produces
        // a one-nibble extension wrapping the branch.
        let leaf = LeafNode::new(Nibbles::from_bytes(b"dog"), b"v1".to_vec());
        let updated = leaf.insert(Nibbles::from_bytes(b"cat"), b"v2".to_vec()).unwrap();
        assert!(matches!(updated, Node::Extension(_)));
    }

    #[test]
    fn fully_diverging_key_splits_into_bare_branch() {
        // 0x00.. vs 0xf0.. differ in the very first nibble.
        let leaf = LeafNode::new(Nibbles::from_raw(&[0x00], true), b"v1".to_vec());
        let updated = leaf
            .insert(Nibbles::from_raw(&[0xf0], true), b"v2".to_vec())
            .unwrap();
        assert!(matches!(updated, Node::Branch(_)));
    }
}
