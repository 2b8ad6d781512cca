//! Persistent byte-keyed key-value store abstraction (component C1).
//!
//! The trie engine, block storage and transaction pool all sit on top of
//! a [`KvStore`] rather than any particular database, the same way the
//! original node treated badger/bolt/leveldb as interchangeable
//! `storage.Persister` backends behind one interface.
//!
//! [`BatchedMemoryStore`] models the batching behavior real backends use
//! for write throughput: puts land in a pending batch and only become
//! visible to `get`/`has` once the batch flushes, either after
//! `batch_delay` elapses or once `max_batch_size` entries have queued up.
//! A reader racing an in-flight batch sees [`StorageError::KeyNotFound`]
//! for a key until the flush window closes — callers that need
//! durability before reading back a just-written key must wait for it.

pub mod error;

use std::{
    collections::HashMap,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

pub use error::StorageError;

/// A persistent byte-keyed store. Implementations are free to batch or
/// buffer writes internally but must serialize them: the trie never
/// issues concurrent writes, though readers may run in parallel with an
/// in-flight batch elsewhere in the process.
pub trait KvStore: Send + Sync {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError>;
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError>;
    fn has(&self, key: &[u8]) -> Result<(), StorageError>;
    fn remove(&self, key: &[u8]) -> Result<(), StorageError>;
    fn close(&self);
}

enum Op {
    Put(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

struct Shared {
    committed: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    pending: Mutex<Vec<Op>>,
    max_batch_size: usize,
}

impl Shared {
    fn flush(&self) {
        let ops = std::mem::take(&mut *self.pending.lock());
        if ops.is_empty() {
            return;
        }
        tracing::trace!(count = ops.len(), "flushing batch to committed store");
        let mut committed = self.committed.write();
        for op in ops {
            match op {
                Op::Put(k, v) => {
                    committed.insert(k, v);
                }
                Op::Remove(k) => {
                    committed.remove(&k);
                }
            }
        }
    }
}

/// In-memory [`KvStore`] with the batch-delay / max-batch-size semantics
/// described in §6. A background worker owns the flush cadence for the
/// life of the store and is stopped and joined on [`Self::close`] or
/// drop — no detached thread outlives its store, the deliberate
/// divergence from the original's never-stopping stats sampler.
pub struct BatchedMemoryStore {
    shared: Arc<Shared>,
    flush_now: Sender<()>,
    stop: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchedMemoryStore {
    pub fn new(batch_delay: Duration, max_batch_size: usize) -> Self {
        let shared = Arc::new(Shared {
            committed: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            max_batch_size,
        });

        let (flush_tx, flush_rx) = bounded::<()>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || run_flush_loop(worker_shared, batch_delay, flush_rx, stop_rx));

        Self {
            shared,
            flush_now: flush_tx,
            stop: stop_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn queue(&self, op: Op) {
        let mut pending = self.shared.pending.lock();
        pending.push(op);
        if pending.len() >= self.shared.max_batch_size {
            drop(pending);
            let _ = self.flush_now.try_send(());
        }
    }
}

fn run_flush_loop(shared: Arc<Shared>, batch_delay: Duration, flush_rx: Receiver<()>, stop_rx: Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(flush_rx) -> _ => shared.flush(),
            recv(stop_rx) -> _ => {
                shared.flush();
                return;
            }
            default(batch_delay) => shared.flush(),
        }
    }
}

impl KvStore for BatchedMemoryStore {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        self.queue(Op::Put(key, value));
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
        self.shared
            .committed
            .read()
            .get(key)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    fn has(&self, key: &[u8]) -> Result<(), StorageError> {
        if self.shared.committed.read().contains_key(key) {
            Ok(())
        } else {
            Err(StorageError::KeyNotFound)
        }
    }

    fn remove(&self, key: &[u8]) -> Result<(), StorageError> {
        self.queue(Op::Remove(key.to_vec()));
        Ok(())
    }

    fn close(&self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
            tracing::debug!("flush worker stopped");
        }
    }
}

impl Drop for BatchedMemoryStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_not_visible_before_the_batch_flushes() {
        let store = BatchedMemoryStore::new(Duration::from_secs(60), 1000);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert!(matches!(store.get(b"k"), Err(StorageError::KeyNotFound)));
    }

    #[test]
    fn put_becomes_visible_once_max_batch_size_triggers_a_flush() {
        let store = BatchedMemoryStore::new(Duration::from_secs(60), 1);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        // Give the background worker a moment to drain the flush signal.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(store.get(b"k").unwrap(), b"v".to_vec());
    }

    #[test]
    fn put_becomes_visible_after_the_batch_delay_elapses() {
        let store = BatchedMemoryStore::new(Duration::from_millis(20), 1000);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(store.get(b"k").unwrap(), b"v".to_vec());
    }

    #[test]
    fn close_flushes_pending_writes() {
        let store = BatchedMemoryStore::new(Duration::from_secs(60), 1000);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        store.close();
        assert_eq!(store.get(b"k").unwrap(), b"v".to_vec());
    }

    #[test]
    fn remove_is_batched_like_put() {
        let store = BatchedMemoryStore::new(Duration::from_millis(10), 1000);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        store.close();
        assert!(store.has(b"k").is_ok());

        let store = BatchedMemoryStore::new(Duration::from_millis(10), 1000);
        store.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        store.remove(b"k").unwrap();
        store.close();
        assert!(matches!(store.has(b"k"), Err(StorageError::KeyNotFound)));
    }
}
