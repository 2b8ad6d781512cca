use std::{collections::HashMap, sync::Mutex};

use meridian_common::Digest;

use crate::error::TrieError;

/// Persistent byte-keyed store the trie reads committed nodes from and
/// writes committed nodes to. Keys are node digests; values are the
/// node's serialized (hex-prefix + RLP-like) encoding.
///
/// Implementations are expected to serialize their own writes internally
/// (the trie itself never issues concurrent writes, but readers may run
/// in parallel with an in-flight batch elsewhere in the process).
pub trait TrieDB: Send + Sync {
    fn get(&self, key: Digest) -> Result<Option<Vec<u8>>, TrieError>;
    fn put(&self, key: Digest, value: Vec<u8>) -> Result<(), TrieError>;
    fn put_batch(&self, entries: Vec<(Digest, Vec<u8>)>) -> Result<(), TrieError>;
}

/// Trivial in-memory [`TrieDB`], useful for tests and for tries that are
/// never meant to survive the process (e.g. a stateless proof replay).
#[derive(Default)]
pub struct InMemoryTrieDB {
    inner: Mutex<HashMap<Digest, Vec<u8>>>,
}

impl InMemoryTrieDB {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrieDB for InMemoryTrieDB {
    fn get(&self, key: Digest) -> Result<Option<Vec<u8>>, TrieError> {
        let db = self.inner.lock().map_err(|_| TrieError::Storage("poisoned lock".into()))?;
        Ok(db.get(&key).cloned())
    }

    fn put(&self, key: Digest, value: Vec<u8>) -> Result<(), TrieError> {
        let mut db = self.inner.lock().map_err(|_| TrieError::Storage("poisoned lock".into()))?;
        db.insert(key, value);
        Ok(())
    }

    fn put_batch(&self, entries: Vec<(Digest, Vec<u8>)>) -> Result<(), TrieError> {
        let mut db = self.inner.lock().map_err(|_| TrieError::Storage("poisoned lock".into()))?;
        for (key, value) in entries {
            db.insert(key, value);
        }
        Ok(())
    }
}
