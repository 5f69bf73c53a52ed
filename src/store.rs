//! Item Store
//!
//! [`Store`] ties the allocator, the hash index and the eviction policy
//! together. It is the single-threaded core of the engine: every method takes
//! `&mut self`, and [`ConcurrentStore`](crate::ConcurrentStore) puts one behind
//! a lock to share it between threads.
//!
//! # Item lifecycle
//!
//! ```text
//!             alloc                 link
//!   Free ───────────────▶ Allocated ─────────▶ Linked ──┐
//!    ▲                      │  ▲                 │      │ update / get
//!    │        free          │  │     unlink      │ ◀────┘
//!    └──────────────────────┘  └─────────────────┘
//!            (refcount 0)
//! ```
//!
//! - [`alloc`](Store::alloc) takes a chunk, evicting if needed, and writes
//!   the key. The caller fills the value through [`value_mut`](Store::value_mut).
//! - [`link`](Store::link) makes the item reachable, stamps a fresh CAS and
//!   puts it at the head of its class recency list.
//! - [`unlink`](Store::unlink) removes it from both. An unpinned chunk goes
//!   straight back to its freelist; a pinned one waits for its last
//!   [`release`](Store::release).
//! - [`get`](Store::get) finds a live item and bumps it to the head. Expired
//!   items are unlinked on the spot and reported absent.
//!
//! Overwrites reuse the chunk in place when the new item maps to the same
//! class and nobody holds a pin on it; otherwise a new chunk is linked and the
//! old one unlinked.

use core::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;

use tracing::{debug, trace};

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

use crate::command::StatsKind;
use crate::config::EngineConfig;
use crate::error::{AllocError, ConfigError, DuplicateKey};
use crate::eviction::{self, EvictionPolicy, Evictor, Victim};
use crate::hashtable::HashTable;
use crate::item::{item_ntotal, ChunkState, ItemId, ItemView, KEY_MAX_LEN};
use crate::metrics::{CacheMetrics, EngineMetrics};
use crate::slab::SlabAllocator;
use crate::time::{Clock, SystemClock};

/// Slab-allocated key-value store.
///
/// # Example
///
/// ```
/// use slabcache::{EngineConfig, Request, Response, Store};
///
/// let mut store = Store::new(EngineConfig::default()).unwrap();
/// let stored = store.execute(Request::Set {
///     key: b"greeting",
///     value: b"hello",
///     flags: 0,
///     exptime: 0,
/// });
/// assert_eq!(stored, Response::Stored);
///
/// match store.execute(Request::Get { key: b"greeting" }) {
///     Response::Found(value) => assert_eq!(value.data, b"hello"),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub struct Store<S = DefaultHashBuilder> {
    pub(crate) config: EngineConfig,
    pub(crate) slabs: SlabAllocator,
    pub(crate) table: HashTable,
    hash_builder: S,
    evictor: Evictor,
    clock: Arc<dyn Clock>,
    /// Last CAS handed out.
    cas: u64,
    /// Logical time for slab stamps.
    tick: u64,
    pub(crate) metrics: EngineMetrics,
}

impl Store<DefaultHashBuilder> {
    /// Creates a store reading the wall clock.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a store reading `clock`.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        Self::with_hasher(config, clock, DefaultHashBuilder::default())
    }
}

impl<S: BuildHasher> Store<S> {
    /// Creates a store with a custom hasher.
    pub fn with_hasher(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        hash_builder: S,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let slabs = SlabAllocator::new(config.size_classes(), config.slab_size, config.max_bytes);
        let table = HashTable::new(config.hash_power);
        let evictor = Evictor::new(config.eviction, config.eviction_seed);

        debug!(
            classes = slabs.size_classes().len(),
            max_bytes = config.max_bytes,
            slab_size = config.slab_size,
            hash_power = table.power(),
            eviction = %config.eviction,
            "created store"
        );

        Ok(Self {
            config,
            slabs,
            table,
            hash_builder,
            evictor,
            clock,
            cas: 0,
            tick: 0,
            metrics: EngineMetrics::default(),
        })
    }

    /// The configuration the store was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The slab allocator.
    pub fn slabs(&self) -> &SlabAllocator {
        &self.slabs
    }

    /// The hash index.
    pub fn hash_table(&self) -> &HashTable {
        &self.table
    }

    /// Raw counters.
    pub fn engine_metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// The eviction policy in effect.
    pub fn policy(&self) -> EvictionPolicy {
        self.evictor.policy()
    }

    /// Number of linked items.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True if no item is linked.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Bytes of slab memory in use.
    pub fn bytes_used(&self) -> usize {
        self.slabs.bytes_used()
    }

    #[inline]
    pub(crate) fn now(&self) -> u32 {
        self.clock.now()
    }

    #[inline]
    fn hash(&self, key: &[u8]) -> u32 {
        self.hash_builder.hash_one(key) as u32
    }

    #[inline]
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn next_cas(&mut self) -> u64 {
        self.cas += 1;
        self.cas
    }

    pub(crate) fn class_for(&self, ntotal: usize) -> Result<u8, AllocError> {
        self.slabs.class_for_size(ntotal).ok_or(AllocError::Oversize {
            size: ntotal,
            max: self.slabs.size_classes().max_chunk_size(),
        })
    }

    /// Allocates an unlinked item for `key` with room for `nbyte` value bytes.
    ///
    /// `exptime` is absolute. The value is zeroed until written through
    /// [`value_mut`](Self::value_mut). Nothing is reachable until
    /// [`link`](Self::link).
    ///
    /// # Panics
    ///
    /// If `key` is longer than [`KEY_MAX_LEN`].
    pub fn alloc(
        &mut self,
        key: &[u8],
        nbyte: usize,
        flags: u32,
        exptime: u32,
    ) -> Result<ItemId, AllocError> {
        assert!(key.len() <= KEY_MAX_LEN, "key of {} bytes", key.len());
        let class = self.class_for(item_ntotal(key.len(), nbyte, flags))?;
        let id = self.alloc_chunk(class)?;
        let hash = self.hash(key);

        self.slabs.set_key(id, key);
        let meta = self.slabs.meta_mut(id);
        meta.nbyte = nbyte as u32;
        meta.flags = flags;
        meta.exptime = exptime;
        meta.hash = hash;
        self.slabs.value_mut(id).fill(0);
        Ok(id)
    }

    fn alloc_chunk(&mut self, class: u8) -> Result<ItemId, AllocError> {
        let tick = self.next_tick();
        if let Some(id) = self.slabs.alloc(class, tick) {
            return Ok(id);
        }

        let freed = match self.evictor.policy() {
            EvictionPolicy::None => false,
            EvictionPolicy::Lru => self.evict_lru(class),
            EvictionPolicy::RandomSlab
            | EvictionPolicy::LeastRecentlyAccessedSlab
            | EvictionPolicy::LeastRecentlyCreatedSlab => self.evict_slab(class),
        };
        if freed {
            if let Some(id) = self.slabs.alloc(class, tick) {
                return Ok(id);
            }
        }

        debug!(class, policy = %self.evictor.policy(), "out of memory");
        Err(AllocError::OutOfMemory { class })
    }

    fn evict_lru(&mut self, class: u8) -> bool {
        match eviction::lru_victim(&self.slabs, class, self.now()) {
            Some(Victim::Expired(id)) => {
                self.unlink(id);
                self.metrics.reclaimed += 1;
                self.slabs.class_metrics_mut(class).reclaimed += 1;
                true
            }
            Some(Victim::Live(id)) => {
                trace!(?id, class, "evicting item");
                self.unlink(id);
                self.metrics.evictions += 1;
                self.slabs.class_metrics_mut(class).evictions += 1;
                true
            }
            None => false,
        }
    }

    fn evict_slab(&mut self, class: u8) -> bool {
        let Some(slab) = self.evictor.select_slab(&self.slabs) else {
            return false;
        };

        let now = self.now();
        let items = self.slabs.slab_items(slab);
        let count = items.len();
        for id in items {
            let item_class = self.slabs.item_class(id);
            if self.slabs.meta(id).is_expired(now) {
                self.metrics.reclaimed += 1;
                self.slabs.class_metrics_mut(item_class).reclaimed += 1;
            } else {
                self.metrics.evictions += 1;
                self.slabs.class_metrics_mut(item_class).evictions += 1;
            }
            self.unlink(id);
        }

        let tick = self.next_tick();
        self.slabs.reassign(slab, class, tick);
        self.metrics.slab_evictions += 1;
        trace!(slab, class, items = count, "evicted slab");
        true
    }

    /// Makes an allocated item reachable under its key.
    ///
    /// Fails if the key is already indexed; unlink the old item first. A
    /// failed link discards the item, so `id` must not be used again.
    pub fn link(&mut self, id: ItemId) -> Result<(), DuplicateKey> {
        assert_eq!(
            self.slabs.meta(id).state,
            ChunkState::Allocated,
            "linking item {id:?} that is not freshly allocated"
        );
        if let Err(err) = self.table.insert(id, &mut self.slabs) {
            self.discard(id);
            return Err(err);
        }

        let tick = self.next_tick();
        let cas = self.next_cas();
        let meta = self.slabs.meta_mut(id);
        meta.state = ChunkState::Linked;
        meta.cas = cas;
        let ntotal = meta.ntotal();

        self.slabs.lru_attach(id);
        self.slabs.touch_slab(id.slab(), tick);
        self.metrics.record_link(ntotal);
        Ok(())
    }

    /// Returns an allocated item that was never linked to its freelist.
    ///
    /// A pinned item goes back on its last [`release`](Self::release).
    pub fn discard(&mut self, id: ItemId) {
        let meta = self.slabs.meta(id);
        assert_eq!(
            meta.state,
            ChunkState::Allocated,
            "discarding item {id:?} that is not allocated"
        );
        if meta.refcount == 0 {
            self.slabs.free(id);
        }
    }

    /// Removes a linked item from the index and its recency list.
    ///
    /// The chunk is freed now, or on the last [`release`](Self::release) if
    /// the item is pinned.
    pub fn unlink(&mut self, id: ItemId) {
        assert!(
            self.slabs.meta(id).is_linked(),
            "unlinking item {id:?} that is not linked"
        );
        let removed = self.table.remove_item(id, &mut self.slabs);
        assert!(removed, "linked item {id:?} missing from the hash index");
        self.slabs.lru_detach(id);

        let meta = self.slabs.meta_mut(id);
        meta.state = ChunkState::Allocated;
        let ntotal = meta.ntotal();
        let pinned = meta.refcount > 0;
        self.metrics.record_unlink(ntotal);

        if !pinned {
            self.slabs.free(id);
        }
    }

    /// Marks a linked item as just used without relinking it.
    pub fn update(&mut self, id: ItemId) {
        assert!(
            self.slabs.meta(id).is_linked(),
            "updating item {id:?} that is not linked"
        );
        let tick = self.next_tick();
        self.slabs.lru_touch(id);
        self.slabs.touch_slab(id.slab(), tick);
    }

    /// Finds a live item without touching recency or lookup counters.
    ///
    /// An expired match is unlinked and counted as `expired`.
    pub(crate) fn find_live(&mut self, key: &[u8]) -> Option<ItemId> {
        let hash = self.hash(key);
        let id = self.table.find(key, hash, &self.slabs)?;
        if self.slabs.meta(id).is_expired(self.now()) {
            trace!(?id, "expired on lookup");
            self.unlink(id);
            self.metrics.expired += 1;
            return None;
        }
        Some(id)
    }

    /// Looks up `key`, bumping the item to the head of its recency list.
    pub fn get(&mut self, key: &[u8]) -> Option<ItemId> {
        match self.find_live(key) {
            Some(id) => {
                self.update(id);
                self.metrics.record_hit();
                Some(id)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Looks up `key` and pins the item so its chunk is not reused until
    /// [`release`](Self::release).
    pub fn acquire(&mut self, key: &[u8]) -> Option<ItemId> {
        let id = self.get(key)?;
        self.slabs.meta_mut(id).refcount += 1;
        Some(id)
    }

    /// Drops one pin. Frees the chunk if it was the last pin on an unlinked
    /// item.
    pub fn release(&mut self, id: ItemId) {
        let meta = self.slabs.meta_mut(id);
        assert!(meta.refcount > 0, "releasing unpinned item {id:?}");
        meta.refcount -= 1;
        if meta.refcount == 0 && meta.state == ChunkState::Allocated {
            self.slabs.free(id);
        }
    }

    /// Reads an item.
    ///
    /// `id` must be linked, pinned, or freshly allocated.
    pub fn item(&self, id: ItemId) -> ItemView<'_> {
        let meta = self.slabs.meta(id);
        ItemView {
            key: self.slabs.key(id),
            value: self.slabs.value(id),
            flags: meta.flags,
            exptime: meta.exptime,
            cas: meta.cas,
        }
    }

    /// Value bytes of an allocated item, for filling in before
    /// [`link`](Self::link).
    pub fn value_mut(&mut self, id: ItemId) -> &mut [u8] {
        self.slabs.value_mut(id)
    }

    /// Stores `value` under `key`, reusing `existing` in place when possible.
    ///
    /// `existing` is the currently linked item for `key`, if any. When the
    /// new item needs a different class or the old one is pinned, a new chunk
    /// is allocated and linked and whatever is indexed under `key` by then is
    /// unlinked. On failure the old item is left as it was.
    pub(crate) fn write_item(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: u32,
        existing: Option<ItemId>,
    ) -> Result<ItemId, AllocError> {
        let class = self.class_for(item_ntotal(key.len(), value.len(), flags))?;

        if let Some(old) = existing {
            if self.slabs.meta(old).refcount == 0 && self.slabs.item_class(old) == class {
                self.overwrite(old, value, flags, exptime);
                return Ok(old);
            }
        }

        let id = self.alloc(key, value.len(), flags, exptime)?;
        self.slabs.value_mut(id).copy_from_slice(value);

        let hash = self.slabs.meta(id).hash;
        if let Some(old) = self.table.find(key, hash, &self.slabs) {
            self.unlink(old);
        }
        let linked = self.link(id);
        assert!(
            linked.is_ok(),
            "key still indexed after unlinking its previous item"
        );
        Ok(id)
    }

    fn overwrite(&mut self, id: ItemId, value: &[u8], flags: u32, exptime: u32) {
        let tick = self.next_tick();
        let cas = self.next_cas();

        let meta = self.slabs.meta_mut(id);
        let old_ntotal = meta.ntotal();
        meta.nbyte = value.len() as u32;
        meta.flags = flags;
        meta.exptime = exptime;
        meta.cas = cas;
        let new_ntotal = meta.ntotal();

        self.slabs.value_mut(id).copy_from_slice(value);
        self.slabs.lru_touch(id);
        self.slabs.touch_slab(id.slab(), tick);
        self.metrics.record_overwrite(old_ntotal, new_ntotal);
    }

    /// Unlinks every item.
    pub fn flush_all(&mut self) {
        let linked: Vec<ItemId> = self.slabs.linked_items().collect();
        let count = linked.len();
        for id in linked {
            self.unlink(id);
        }
        debug!(items = count, "flushed all items");
    }

    /// Walks every structure and panics on the first inconsistency.
    ///
    /// Linear in the number of chunks; meant for tests and debugging.
    pub fn check_invariants(&self) {
        self.slabs.check_invariants();

        let mut linked = 0usize;
        for id in self.slabs.linked_items() {
            linked += 1;
            let key = self.slabs.key(id);
            let hash = self.slabs.meta(id).hash;
            assert_eq!(hash, self.hash(key), "stale hash on {id:?}");
            assert_eq!(
                self.table.find(key, hash, &self.slabs),
                Some(id),
                "linked item {id:?} is not indexed"
            );
        }
        assert_eq!(linked, self.table.len(), "index size");
        assert_eq!(linked as u64, self.metrics.curr_items, "curr_items");
        assert!(self.slabs.bytes_used() <= self.slabs.max_bytes());
    }
}

impl<S: BuildHasher> CacheMetrics for Store<S> {
    fn metrics(&self) -> std::collections::BTreeMap<String, f64> {
        self.stats(StatsKind::General)
    }

    fn policy_name(&self) -> &'static str {
        self.evictor.policy().as_str()
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("items", &self.table.len())
            .field("bytes_used", &self.slabs.bytes_used())
            .field("max_bytes", &self.slabs.max_bytes())
            .field("policy", &self.evictor.policy())
            .field("hash_power", &self.table.power())
            .finish()
    }
}
