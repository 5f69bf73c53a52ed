//! Concurrency Gate
//!
//! [`ConcurrentStore`] shares one [`Store`] between worker threads by putting
//! it behind a single `parking_lot::Mutex`.
//!
//! # Architecture
//!
//! ```text
//!   worker 0 ──┐
//!   worker 1 ──┼──▶ Mutex<Store> ──▶ slabs, hash index, recency lists, CAS
//!   worker N ──┘
//! ```
//!
//! Every operation that reads or writes the index, the freelists, the recency
//! lists or the CAS counter runs inside one critical section. Requests on the
//! same key are therefore totally ordered by lock acquisition, and a CAS check
//! and the store it guards can never interleave with another writer.
//!
//! ## Why Mutex Instead of RwLock?
//!
//! A hit moves the item to the head of its recency list and stamps its slab,
//! so `get` mutates as much as `set` does. Every access would need the write
//! half of an `RwLock` anyway; `parking_lot::Mutex` has less bookkeeping and
//! does not pretend reads can proceed in parallel.
//!
//! A hash table resize also runs under the lock. It stops the world for one
//! rehash pass, which is rare enough (each resize doubles the table) not to
//! matter for throughput.
//!
//! # Example
//!
//! ```rust
//! use slabcache::{ConcurrentStore, EngineConfig, Response};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let store = Arc::new(ConcurrentStore::new(EngineConfig::default()).unwrap());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let store = Arc::clone(&store);
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 let key = format!("key_{t}_{i}");
//!                 assert_eq!(store.set(key.as_bytes(), b"value", 0, 0), Response::Stored);
//!                 assert!(store.get(key.as_bytes()).is_some());
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(store.len(), 400);
//! ```
//!
//! # Zero-Copy Access
//!
//! [`get_with`](ConcurrentStore::get_with) runs a closure on the value while
//! the lock is held. [`get_ref`](ConcurrentStore::get_ref) instead pins the
//! item and returns an [`ItemRef`]: the lock is released, the chunk cannot be
//! reused while the handle lives, and the value stays readable even after the
//! key is overwritten or deleted.
//!
//! ```rust
//! use slabcache::{ConcurrentStore, EngineConfig};
//!
//! let store = ConcurrentStore::new(EngineConfig::default()).unwrap();
//! store.set(b"page", b"<html>", 0, 0);
//!
//! let pinned = store.get_ref(b"page").unwrap();
//! store.delete(b"page");
//! assert_eq!(pinned.to_vec(), b"<html>");
//! ```

use core::fmt;
use std::collections::BTreeMap;
use std::hash::BuildHasher;
use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

use crate::command::{Request, Response};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::item::{ItemId, ItemView};
use crate::metrics::CacheMetrics;
use crate::store::Store;
use crate::time::Clock;

/// Thread-safe [`Store`].
pub struct ConcurrentStore<S = DefaultHashBuilder> {
    inner: Mutex<Store<S>>,
}

impl ConcurrentStore<DefaultHashBuilder> {
    /// Creates a store reading the wall clock.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Store::new(config).map(Self::from_store)
    }

    /// Creates a store reading `clock`.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        Store::with_clock(config, clock).map(Self::from_store)
    }
}

impl<S: BuildHasher> ConcurrentStore<S> {
    /// Wraps an existing store.
    pub fn from_store(store: Store<S>) -> Self {
        Self {
            inner: Mutex::new(store),
        }
    }

    /// Unwraps the inner store.
    pub fn into_inner(self) -> Store<S> {
        self.inner.into_inner()
    }

    /// Executes one request under the lock.
    pub fn execute(&self, request: Request<'_>) -> Response {
        self.inner.lock().execute(request)
    }

    /// Copies out the value of `key`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get_with(key, |item| item.value.to_vec())
    }

    /// Looks up `key` and applies `f` to the item while the lock is held.
    ///
    /// Counts as a lookup and bumps recency like [`get`](Self::get).
    pub fn get_with<F, R>(&self, key: &[u8], f: F) -> Option<R>
    where
        F: FnOnce(ItemView<'_>) -> R,
    {
        let mut store = self.inner.lock();
        let id = store.get(key)?;
        Some(f(store.item(id)))
    }

    /// Looks up `key` and pins the item.
    ///
    /// The chunk is not reused until the returned handle is dropped. The
    /// handle outlives overwrites and deletes of the key, always reading the
    /// value as it was when pinned.
    pub fn get_ref(&self, key: &[u8]) -> Option<ItemRef<'_, S>> {
        let mut store = self.inner.lock();
        let id = store.acquire(key)?;
        let item = store.item(id);
        Some(ItemRef {
            store: self,
            id,
            flags: item.flags,
            cas: item.cas,
            len: item.value.len(),
        })
    }

    /// Stores `value` under `key` unconditionally.
    pub fn set(&self, key: &[u8], value: &[u8], flags: u32, exptime: u32) -> Response {
        self.inner.lock().set(key, value, flags, exptime)
    }

    /// Removes `key`.
    pub fn delete(&self, key: &[u8]) -> Response {
        self.inner.lock().delete(key)
    }

    /// Runs `f` with exclusive access to the inner store.
    pub fn with_store<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Store<S>) -> R,
    {
        f(&mut self.inner.lock())
    }

    /// Number of linked items.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if no item is linked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Bytes of slab memory in use.
    pub fn bytes_used(&self) -> usize {
        self.inner.lock().bytes_used()
    }

    /// See [`Store::check_invariants`].
    pub fn check_invariants(&self) {
        self.inner.lock().check_invariants();
    }

    fn release(&self, id: ItemId) {
        self.inner.lock().release(id);
    }
}

impl<S: BuildHasher> CacheMetrics for ConcurrentStore<S> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.inner.lock().metrics()
    }

    fn policy_name(&self) -> &'static str {
        self.inner.lock().policy_name()
    }
}

impl<S> fmt::Debug for ConcurrentStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(store) => f
                .debug_struct("ConcurrentStore")
                .field("store", &*store)
                .finish(),
            None => f
                .debug_struct("ConcurrentStore")
                .field("store", &"<locked>")
                .finish(),
        }
    }
}

/// Pinned item of a [`ConcurrentStore`].
///
/// Holds a reference count on the item, not the lock. Reading the value takes
/// the lock briefly; dropping the handle releases the pin.
pub struct ItemRef<'a, S: BuildHasher = DefaultHashBuilder> {
    store: &'a ConcurrentStore<S>,
    id: ItemId,
    flags: u32,
    cas: u64,
    len: usize,
}

impl<S: BuildHasher> ItemRef<'_, S> {
    /// Applies `f` to the pinned value.
    pub fn with_value<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        let store = self.store.inner.lock();
        f(store.item(self.id).value)
    }

    /// Copies the pinned value out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_value(<[u8]>::to_vec)
    }

    /// Client flags at the time of pinning.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// CAS token at the time of pinning.
    pub fn cas(&self) -> u64 {
        self.cas
    }

    /// Value length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for an empty value.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<S: BuildHasher> Drop for ItemRef<'_, S> {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}

impl<S: BuildHasher> fmt::Debug for ItemRef<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemRef")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("cas", &self.cas)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use crate::EvictionPolicy;
    use scoped_threadpool::Pool;

    fn small_store() -> ConcurrentStore {
        let config = EngineConfig {
            max_bytes: 8 * 1024 * 1024,
            hash_power: 10,
            ..Default::default()
        };
        ConcurrentStore::with_clock(config, Arc::new(ManualClock::new(1_000_000_000))).unwrap()
    }

    #[test]
    fn test_basic_operations() {
        let store = small_store();
        assert!(store.is_empty());

        store.set(b"a", b"1", 0, 0);
        store.set(b"b", b"2", 0, 0);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(store.get(b"c"), None);

        assert_eq!(store.delete(b"a"), Response::Deleted);
        assert_eq!(store.get(b"a"), None);
        assert_eq!(store.policy_name(), "lru");
    }

    #[test]
    fn test_get_with() {
        let store = small_store();
        store.set(b"key", b"hello world", 9, 0);

        assert_eq!(store.get_with(b"key", |item| item.value.len()), Some(11));
        assert_eq!(store.get_with(b"key", |item| item.flags), Some(9));
        assert_eq!(store.get_with(b"missing", |item| item.value.len()), None);
    }

    #[test]
    fn test_item_ref_survives_overwrite() {
        let store = small_store();
        store.set(b"k", b"first", 1, 0);

        let pinned = store.get_ref(b"k").unwrap();
        assert_eq!(pinned.flags(), 1);
        assert_eq!(pinned.len(), 5);

        store.set(b"k", b"second", 2, 0);
        assert_eq!(pinned.to_vec(), b"first");
        assert_eq!(store.get(b"k"), Some(b"second".to_vec()));

        store.delete(b"k");
        assert_eq!(pinned.with_value(|v| v.len()), 5);

        drop(pinned);
        store.check_invariants();
    }

    #[test]
    fn test_item_ref_blocks_chunk_reuse() {
        let config = EngineConfig {
            chunk_size: 96,
            factor: 2.0,
            max_chunk_size: 1536,
            slab_size: 1536,
            max_bytes: 1536,
            eviction: EvictionPolicy::Lru,
            ..Default::default()
        };
        let store =
            ConcurrentStore::with_clock(config, Arc::new(ManualClock::new(1_000_000_000)))
                .unwrap();
        store.set(b"pinned", b"v", 0, 0);
        let pinned = store.get_ref(b"pinned").unwrap();

        // churn through the class; the pinned chunk must never be handed out
        for i in 0..100 {
            store.set(format!("k{i}").as_bytes(), b"x", 0, 0);
        }
        assert_eq!(pinned.to_vec(), b"v");
        drop(pinned);
        store.check_invariants();
    }

    #[test]
    fn test_scoped_pool_access() {
        let store = small_store();
        let mut pool = Pool::new(4);

        pool.scoped(|scope| {
            for t in 0..4 {
                let store = &store;
                scope.execute(move || {
                    for i in 0..500 {
                        let key = format!("t{t}_k{i}");
                        store.set(key.as_bytes(), key.as_bytes(), t, 0);
                        assert_eq!(store.get(key.as_bytes()), Some(key.into_bytes()));
                    }
                });
            }
        });

        assert_eq!(store.len(), 2000);
        store.check_invariants();
        assert_eq!(store.metrics().get("curr_items"), Some(&2000.0));
    }

    #[test]
    fn test_with_store() {
        let store = small_store();
        store.set(b"k", b"v", 0, 0);
        let classes = store.with_store(|inner| inner.slabs().size_classes().len());
        assert!(classes > 1);
        assert_eq!(store.into_inner().len(), 1);
    }
}
