//! Shard-partitioned LRU transaction pool with insertion notification
//! (component C5): one bounded [`Cache`] per `(sender_shard,
//! receiver_shard)` cache id, plus a background dispatcher that tells
//! registered handlers about newly inserted keys without blocking the
//! inserting thread.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

/// A single shard's bounded cache. Least-recently-inserted entries are
/// evicted once `capacity` is exceeded, matching the original's
/// shard-data-store behavior of capping memory per destination pair
/// rather than globally.
pub struct Cache<V> {
    inner: Mutex<LruCache<Vec<u8>, V>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn put(&self, key: Vec<u8>, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn peek(&self, key: &[u8]) -> Option<V> {
        self.inner.lock().peek(key).cloned()
    }

    /// Keys in insertion order, oldest first. `put` promotes a key to
    /// most-recently-used, and `peek` never does, so as long as callers
    /// only insert and peek (never `get`), the LRU's most-to-least-recent
    /// ordering is exactly reverse insertion order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self.inner.lock().iter().map(|(k, _)| k.clone()).collect();
        keys.reverse();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, key: &[u8]) -> Option<V> {
        self.inner.lock().pop(key)
    }
}

/// External contract a transaction preprocessor (or any other consumer)
/// depends on: insert data under a shard-pair cache id, look up a
/// shard's cache, and subscribe to insertion notifications.
pub trait ShardedDataCacherNotifier<V>: Send + Sync {
    fn add_data(&self, key: Vec<u8>, value: V, cache_id: &str);
    fn shard_data_store(&self, cache_id: &str) -> Option<Arc<Cache<V>>>;
    fn remove_data(&self, key: &[u8], cache_id: &str);
    fn register_handler(&self, handler: Arc<dyn Fn(&[u8]) + Send + Sync>);
}

/// The concrete sharded cacher-notifier: one [`Cache`] per cache id,
/// created lazily on first insert, plus a dispatcher thread that invokes
/// registered handlers for each newly inserted key. The dispatcher's
/// lifetime is bound to this struct (stopped and joined on drop) rather
/// than left running forever.
pub struct ShardedCacher<V> {
    shards: RwLock<HashMap<String, Arc<Cache<V>>>>,
    capacity_per_shard: NonZeroUsize,
    handlers: Arc<RwLock<Vec<Arc<dyn Fn(&[u8]) + Send + Sync>>>>,
    notify_tx: Option<Sender<Vec<u8>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + Sync + 'static> ShardedCacher<V> {
    pub fn new(capacity_per_shard: NonZeroUsize) -> Self {
        let handlers: Arc<RwLock<Vec<Arc<dyn Fn(&[u8]) + Send + Sync>>>> = Arc::new(RwLock::new(Vec::new()));
        let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = unbounded();

        let dispatcher_handlers = Arc::clone(&handlers);
        let dispatcher = thread::spawn(move || {
            for key in rx.iter() {
                let handlers = dispatcher_handlers.read();
                tracing::trace!(handlers = handlers.len(), "dispatching pool insertion notification");
                for handler in handlers.iter() {
                    handler(&key);
                }
            }
        });

        Self {
            shards: RwLock::new(HashMap::new()),
            capacity_per_shard,
            handlers,
            notify_tx: Some(tx),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    fn shard_or_create(&self, cache_id: &str) -> Arc<Cache<V>> {
        if let Some(cache) = self.shards.read().get(cache_id) {
            return Arc::clone(cache);
        }
        let mut shards = self.shards.write();
        Arc::clone(shards.entry(cache_id.to_string()).or_insert_with(|| {
            tracing::debug!(cache_id, "creating shard cache");
            Arc::new(Cache::new(self.capacity_per_shard))
        }))
    }
}

impl<V: Clone + Send + Sync + 'static> ShardedDataCacherNotifier<V> for ShardedCacher<V> {
    fn add_data(&self, key: Vec<u8>, value: V, cache_id: &str) {
        let cache = self.shard_or_create(cache_id);
        cache.put(key.clone(), value);
        if let Some(tx) = &self.notify_tx {
            let _ = tx.send(key);
        }
    }

    fn shard_data_store(&self, cache_id: &str) -> Option<Arc<Cache<V>>> {
        self.shards.read().get(cache_id).cloned()
    }

    fn remove_data(&self, key: &[u8], cache_id: &str) {
        if let Some(cache) = self.shard_data_store(cache_id) {
            cache.remove(key);
        }
    }

    fn register_handler(&self, handler: Arc<dyn Fn(&[u8]) + Send + Sync>) {
        self.handlers.write().push(handler);
    }
}

impl<V> Drop for ShardedCacher<V> {
    fn drop(&mut self) {
        // Dropping the sender closes the channel, which ends the
        // dispatcher's `for key in rx.iter()` loop so the join below
        // can't deadlock.
        self.notify_tx.take();
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn add_data_is_retrievable_from_its_shard() {
        let pool: ShardedCacher<u64> = ShardedCacher::new(cap(16));
        pool.add_data(b"h1".to_vec(), 42, "0_1");
        let cache = pool.shard_data_store("0_1").unwrap();
        assert_eq!(cache.peek(b"h1"), Some(42));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_cache_ids_are_independent() {
        let pool: ShardedCacher<u64> = ShardedCacher::new(cap(16));
        pool.add_data(b"h1".to_vec(), 1, "0_1");
        pool.add_data(b"h2".to_vec(), 2, "1_0");
        assert!(pool.shard_data_store("0_1").unwrap().peek(b"h2").is_none());
        assert!(pool.shard_data_store("1_0").unwrap().peek(b"h1").is_none());
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let cache: Cache<u64> = Cache::new(cap(16));
        cache.put(b"a".to_vec(), 1);
        cache.put(b"b".to_vec(), 2);
        cache.put(b"c".to_vec(), 3);
        assert_eq!(cache.keys(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn remove_data_drops_the_entry() {
        let pool: ShardedCacher<u64> = ShardedCacher::new(cap(16));
        pool.add_data(b"h1".to_vec(), 42, "0_1");
        pool.remove_data(b"h1", "0_1");
        assert!(pool.shard_data_store("0_1").unwrap().peek(b"h1").is_none());
    }

    #[test]
    fn registered_handlers_are_notified_on_insert() {
        let pool: ShardedCacher<u64> = ShardedCacher::new(cap(16));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        pool.register_handler(Arc::new(move |_key: &[u8]| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        pool.add_data(b"h1".to_vec(), 1, "0_1");
        pool.add_data(b"h2".to_vec(), 2, "0_1");

        // Notifications are asynchronous; give the dispatcher a moment.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
