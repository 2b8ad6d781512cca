//! Deterministic node (de)serialization (component C2's codec half; the
//! hasher half is just `sha3::Keccak256`, used directly in [`crate::node`]).
//!
//! The format is a fixed tag byte followed by length-prefixed fields. It
//! isn't meant to interoperate with any particular wire protocol — only to
//! be a byte-exact, injective encoding of a node's logical content,
//! independent of whether its children happen to be loaded or collapsed
//! in memory (invariant 6 in the crate's module docs).

use meridian_common::Digest;

use crate::error::TrieError;

pub const TAG_LEAF: u8 = 0x00;
pub const TAG_EXTENSION: u8 = 0x01;
pub const TAG_BRANCH: u8 = 0x02;

/// Cap on a single encoded node. Exceeding it is a fatal serialization
/// error (§4.1: "serialization overflow (fatal)").
pub const MAX_NODE_SIZE: usize = 1 << 20;

pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend((bytes.len() as u32).to_be_bytes());
    out.extend(bytes);
}

pub fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], TrieError> {
    let len_bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| TrieError::Decode("truncated length prefix".into()))?;
    let len = u32::from_be_bytes(len_bytes.try_into().expect("slice is 4 bytes")) as usize;
    *pos += 4;
    let data = buf
        .get(*pos..*pos + len)
        .ok_or_else(|| TrieError::Decode("truncated field".into()))?;
    *pos += len;
    Ok(data)
}

pub fn write_digest(out: &mut Vec<u8>, digest: &Digest) {
    out.extend(digest.as_bytes());
}

pub fn read_digest(buf: &[u8], pos: &mut usize) -> Result<Digest, TrieError> {
    let data = buf
        .get(*pos..*pos + 32)
        .ok_or_else(|| TrieError::Decode("truncated digest".into()))?;
    *pos += 32;
    Ok(Digest::from_slice(data))
}

pub fn read_tag(buf: &[u8], pos: &mut usize) -> Result<u8, TrieError> {
    let tag = *buf
        .get(*pos)
        .ok_or_else(|| TrieError::Decode("empty node encoding".into()))?;
    *pos += 1;
    Ok(tag)
}
