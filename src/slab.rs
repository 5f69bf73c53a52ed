//! Slab Allocator
//!
//! The memory budget is handed out one slab at a time. Each slab belongs to a
//! single size class and is cut into equal chunks of that class's size:
//!
//! ```text
//!  slab 0 (class 3, 94 byte chunks)     slab 1 (class 7, 185 byte chunks)
//! +------+------+------+-----+------+  +--------+--------+-----+--------+
//! | c0   | c1   | c2   | ... | cN   |  | c0     | c1     | ... | cM     |
//! +------+------+------+-----+------+  +--------+--------+-----+--------+
//!    ^             ^                        ^
//!    |             +-- class 3 freelist     +-- class 7 LRU tail
//!    +-- class 3 LRU head
//! ```
//!
//! Chunks carry no headers. Their metadata lives in a side table next to the
//! slab, indexed by chunk number, and every cross-reference (freelists, hash
//! chains, recency lists) is an [`ItemId`]. The [`ITEM_HDR_SIZE`] bytes each
//! chunk is charged pay for its side table entry, so the payload buffer and
//! the side table of a slab together never exceed `slab_size`:
//!
//! ```text
//! payload  = chunks * (chunk_size - ITEM_HDR_SIZE)
//! metadata = chunks * size_of::<ItemMeta>()      <= chunks * ITEM_HDR_SIZE
//! ```
//!
//! Slabs are never returned. `bytes_used` only grows, one `slab_size` at a
//! time, and never past `max_bytes`. The only way a slab changes class is
//! [`SlabAllocator::reassign`], used by slab-level eviction once every chunk
//! in the slab is free again.

use core::fmt;
use core::mem;

use tracing::debug;

use crate::item::{ChunkState, ItemId, ItemMeta, ITEM_HDR_SIZE};
use crate::list::{Arena, Link, List};
use crate::metrics::SlabClassMetrics;
use crate::size_class::SizeClassTable;

struct Slab {
    class: u8,
    chunk_size: usize,
    /// Key and value bytes, `chunk_size - ITEM_HDR_SIZE` per chunk.
    data: Box<[u8]>,
    items: Vec<ItemMeta>,
    /// Tick at which the slab was carved or last reassigned.
    created: u64,
    /// Tick of the last hit or store on any item in the slab.
    accessed: u64,
}

impl Slab {
    fn new(class: u8, chunk_size: usize, slab_size: usize, tick: u64) -> Self {
        let mut slab = Self {
            class,
            chunk_size,
            data: Box::default(),
            items: Vec::new(),
            created: tick,
            accessed: tick,
        };
        slab.carve(class, chunk_size, slab_size, tick);
        slab
    }

    /// Cuts the slab into chunks of `chunk_size`, dropping whatever it held.
    fn carve(&mut self, class: u8, chunk_size: usize, slab_size: usize, tick: u64) {
        let nchunk = slab_size / chunk_size;
        self.class = class;
        self.chunk_size = chunk_size;
        self.data = vec![0u8; nchunk * (chunk_size - ITEM_HDR_SIZE)].into_boxed_slice();
        self.items = vec![ItemMeta::default(); nchunk];
        self.created = tick;
        self.accessed = tick;
    }

    #[inline]
    fn payload_size(&self) -> usize {
        self.chunk_size - ITEM_HDR_SIZE
    }

    fn chunk(&self, chunk: u32) -> &[u8] {
        let size = self.payload_size();
        let start = chunk as usize * size;
        &self.data[start..start + size]
    }

    fn chunk_mut(&mut self, chunk: u32) -> &mut [u8] {
        let size = self.payload_size();
        let start = chunk as usize * size;
        &mut self.data[start..start + size]
    }

    /// Bytes actually held: payload buffer plus side table.
    fn resident_bytes(&self) -> usize {
        self.data.len() + self.items.len() * mem::size_of::<ItemMeta>()
    }

    fn is_evictable(&self) -> bool {
        self.items
            .iter()
            .all(|meta| meta.refcount == 0 && meta.state != ChunkState::Allocated)
    }
}

/// All slabs, indexed by slab id.
#[derive(Default)]
struct Slabs(Vec<Slab>);

impl fmt::Debug for Slabs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slabs").field("count", &self.0.len()).finish()
    }
}

impl Slabs {
    #[inline]
    fn meta(&self, id: ItemId) -> &ItemMeta {
        &self.0[id.slab() as usize].items[id.chunk() as usize]
    }

    #[inline]
    fn meta_mut(&mut self, id: ItemId) -> &mut ItemMeta {
        &mut self.0[id.slab() as usize].items[id.chunk() as usize]
    }
}

impl Arena for Slabs {
    #[inline]
    fn link(&self, id: ItemId) -> &Link {
        &self.meta(id).lru
    }

    #[inline]
    fn link_mut(&mut self, id: ItemId) -> &mut Link {
        &mut self.meta_mut(id).lru
    }
}

#[derive(Debug)]
struct SlabClass {
    chunk_size: usize,
    chunks_per_slab: usize,
    slabs: usize,
    free: Vec<ItemId>,
    lru: List,
    metrics: SlabClassMetrics,
}

/// Snapshot of a slab used to pick eviction victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlabStamp {
    pub(crate) id: u32,
    pub(crate) class: u8,
    pub(crate) created: u64,
    pub(crate) accessed: u64,
    pub(crate) evictable: bool,
}

/// Occupancy of one size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInfo {
    /// Class id.
    pub id: u8,
    /// Chunk size in bytes.
    pub chunk_size: usize,
    /// Chunks per slab.
    pub chunks_per_slab: usize,
    /// Slabs assigned to the class.
    pub slabs: usize,
    /// Chunks on the freelist.
    pub free_chunks: usize,
    /// Items on the recency list.
    pub linked_items: usize,
}

impl ClassInfo {
    /// Chunks across all slabs of the class.
    pub fn total_chunks(&self) -> usize {
        self.slabs * self.chunks_per_slab
    }

    /// Chunks not on the freelist.
    pub fn used_chunks(&self) -> usize {
        self.total_chunks() - self.free_chunks
    }
}

/// Owner of every slab and of the per-class freelists and recency lists.
#[derive(Debug)]
pub struct SlabAllocator {
    table: SizeClassTable,
    slab_size: usize,
    max_bytes: usize,
    slabs: Slabs,
    // classes[i] is class id i + 1
    classes: Vec<SlabClass>,
}

impl SlabAllocator {
    /// Creates an allocator with no slabs.
    pub fn new(table: SizeClassTable, slab_size: usize, max_bytes: usize) -> Self {
        let classes = table
            .iter()
            .map(|(_, chunk_size)| SlabClass {
                chunk_size,
                chunks_per_slab: slab_size / chunk_size,
                slabs: 0,
                free: Vec::new(),
                lru: List::new(),
                metrics: SlabClassMetrics::default(),
            })
            .collect();
        Self {
            table,
            slab_size,
            max_bytes,
            slabs: Slabs::default(),
            classes,
        }
    }

    /// The size classes this allocator serves.
    pub fn size_classes(&self) -> &SizeClassTable {
        &self.table
    }

    /// Smallest class whose chunks hold `size` bytes.
    #[inline]
    pub fn class_for_size(&self, size: usize) -> Option<u8> {
        self.table.class_for_size(size)
    }

    /// Bytes of every slab carved so far.
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.slabs.0.len() * self.slab_size
    }

    /// The memory budget.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes per slab.
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Number of slabs carved so far.
    pub fn slab_count(&self) -> usize {
        self.slabs.0.len()
    }

    /// Memory the slabs really occupy, payload and metadata together.
    ///
    /// Never more than [`bytes_used`](Self::bytes_used).
    pub fn resident_bytes(&self) -> usize {
        self.slabs.0.iter().map(Slab::resident_bytes).sum()
    }

    /// Occupancy of `id`, `None` for an unknown class.
    pub fn class_info(&self, id: u8) -> Option<ClassInfo> {
        self.table.chunk_size(id)?;
        let class = self.class(id);
        Some(ClassInfo {
            id,
            chunk_size: class.chunk_size,
            chunks_per_slab: class.chunks_per_slab,
            slabs: class.slabs,
            free_chunks: class.free.len(),
            linked_items: class.lru.len(),
        })
    }

    /// Counters of class `id`.
    pub fn class_metrics(&self, id: u8) -> Option<&SlabClassMetrics> {
        self.table.chunk_size(id)?;
        Some(&self.class(id).metrics)
    }

    #[inline]
    fn class(&self, id: u8) -> &SlabClass {
        &self.classes[id as usize - 1]
    }

    #[inline]
    fn class_mut(&mut self, id: u8) -> &mut SlabClass {
        &mut self.classes[id as usize - 1]
    }

    pub(crate) fn class_metrics_mut(&mut self, id: u8) -> &mut SlabClassMetrics {
        &mut self.class_mut(id).metrics
    }

    /// Hands out a free chunk of `class`, carving a new slab if the freelist
    /// is empty and the budget allows. Never evicts.
    pub(crate) fn alloc(&mut self, class: u8, tick: u64) -> Option<ItemId> {
        if self.class(class).free.is_empty() && !self.grow(class, tick) {
            return None;
        }
        let class_ref = self.class_mut(class);
        let id = class_ref.free.pop()?;
        class_ref.metrics.allocations += 1;

        let meta = self.slabs.meta_mut(id);
        assert_eq!(
            meta.state,
            ChunkState::Free,
            "chunk {id:?} on the freelist is not free"
        );
        meta.state = ChunkState::Allocated;
        Some(id)
    }

    fn grow(&mut self, class: u8, tick: u64) -> bool {
        if self.bytes_used() + self.slab_size > self.max_bytes {
            return false;
        }

        let slab_id = self.slabs.0.len() as u32;
        let chunk_size = self.class(class).chunk_size;
        let slab = Slab::new(class, chunk_size, self.slab_size, tick);
        let nchunk = slab.items.len() as u32;
        self.slabs.0.push(slab);
        assert!(self.bytes_used() <= self.max_bytes);

        let class_ref = self.class_mut(class);
        class_ref.slabs += 1;
        // reversed so chunk 0 is handed out first
        class_ref
            .free
            .extend((0..nchunk).rev().map(|chunk| ItemId::new(slab_id, chunk)));

        debug!(
            class,
            slab = slab_id,
            chunk_size,
            chunks = nchunk,
            bytes_used = self.bytes_used(),
            "carved new slab"
        );
        true
    }

    /// Returns an unlinked, unpinned chunk to its class freelist.
    pub(crate) fn free(&mut self, id: ItemId) {
        let meta = self.slabs.meta_mut(id);
        assert_eq!(
            meta.state,
            ChunkState::Allocated,
            "freeing chunk {id:?} that is free or still linked"
        );
        assert_eq!(meta.refcount, 0, "freeing pinned chunk {id:?}");
        *meta = ItemMeta::default();

        let class = self.slabs.0[id.slab() as usize].class;
        self.class_mut(class).free.push(id);
    }

    #[inline]
    pub(crate) fn meta(&self, id: ItemId) -> &ItemMeta {
        self.slabs.meta(id)
    }

    #[inline]
    pub(crate) fn meta_mut(&mut self, id: ItemId) -> &mut ItemMeta {
        self.slabs.meta_mut(id)
    }

    /// Class of the slab holding `id`.
    #[inline]
    pub(crate) fn item_class(&self, id: ItemId) -> u8 {
        self.slabs.0[id.slab() as usize].class
    }

    pub(crate) fn key(&self, id: ItemId) -> &[u8] {
        let nkey = self.meta(id).nkey as usize;
        &self.slabs.0[id.slab() as usize].chunk(id.chunk())[..nkey]
    }

    pub(crate) fn value(&self, id: ItemId) -> &[u8] {
        let meta = self.meta(id);
        let start = meta.nkey as usize;
        let end = start + meta.nbyte as usize;
        &self.slabs.0[id.slab() as usize].chunk(id.chunk())[start..end]
    }

    /// Writes `key` at the start of the chunk and records its length.
    pub(crate) fn set_key(&mut self, id: ItemId, key: &[u8]) {
        self.slabs.meta_mut(id).nkey = key.len() as u8;
        self.slabs.0[id.slab() as usize].chunk_mut(id.chunk())[..key.len()].copy_from_slice(key);
    }

    /// Value bytes of `id`, sized by the item's current `nbyte`.
    pub(crate) fn value_mut(&mut self, id: ItemId) -> &mut [u8] {
        let meta = self.slabs.meta(id);
        let start = meta.nkey as usize;
        let end = start + meta.nbyte as usize;
        &mut self.slabs.0[id.slab() as usize].chunk_mut(id.chunk())[start..end]
    }

    /// Puts `id` at the head of its class recency list.
    pub(crate) fn lru_attach(&mut self, id: ItemId) {
        let class = self.item_class(id) as usize - 1;
        self.classes[class].lru.attach(&mut self.slabs, id);
    }

    pub(crate) fn lru_detach(&mut self, id: ItemId) {
        let class = self.item_class(id) as usize - 1;
        self.classes[class].lru.detach(&mut self.slabs, id);
    }

    pub(crate) fn lru_touch(&mut self, id: ItemId) {
        let class = self.item_class(id) as usize - 1;
        self.classes[class].lru.move_to_front(&mut self.slabs, id);
    }

    /// Least recently used items of `class`, oldest first.
    pub(crate) fn lru_iter(&self, class: u8) -> impl Iterator<Item = ItemId> + '_ {
        self.class(class).lru.iter_rev(&self.slabs)
    }

    pub(crate) fn touch_slab(&mut self, slab: u32, tick: u64) {
        self.slabs.0[slab as usize].accessed = tick;
    }

    pub(crate) fn slab_stamps(&self) -> impl Iterator<Item = SlabStamp> + '_ {
        self.slabs.0.iter().enumerate().map(|(id, slab)| SlabStamp {
            id: id as u32,
            class: slab.class,
            created: slab.created,
            accessed: slab.accessed,
            evictable: slab.is_evictable(),
        })
    }

    /// Linked items in `slab`.
    pub(crate) fn slab_items(&self, slab: u32) -> Vec<ItemId> {
        self.slabs.0[slab as usize]
            .items
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.is_linked())
            .map(|(chunk, _)| ItemId::new(slab, chunk as u32))
            .collect()
    }

    /// Every linked item, in slab order.
    pub(crate) fn linked_items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.slabs.0.iter().enumerate().flat_map(|(slab, s)| {
            s.items
                .iter()
                .enumerate()
                .filter(|(_, meta)| meta.is_linked())
                .map(move |(chunk, _)| ItemId::new(slab as u32, chunk as u32))
        })
    }

    /// Moves an empty slab to `class` and re-carves it.
    ///
    /// Every chunk of the slab must be free.
    pub(crate) fn reassign(&mut self, slab: u32, class: u8, tick: u64) {
        let old_class = self.slabs.0[slab as usize].class;
        assert!(
            self.slabs.0[slab as usize]
                .items
                .iter()
                .all(|meta| meta.state == ChunkState::Free),
            "reassigning slab {slab} with chunks in use"
        );

        let old = self.class_mut(old_class);
        old.free.retain(|id| id.slab() != slab);
        old.slabs -= 1;
        old.metrics.slabs_lost += 1;

        let chunk_size = self.class(class).chunk_size;
        let slab_size = self.slab_size;
        let target = &mut self.slabs.0[slab as usize];
        target.carve(class, chunk_size, slab_size, tick);
        let nchunk = target.items.len() as u32;

        let new = self.class_mut(class);
        new.slabs += 1;
        new.metrics.slabs_gained += 1;
        new.free
            .extend((0..nchunk).rev().map(|chunk| ItemId::new(slab, chunk)));

        debug!(
            slab,
            from = old_class,
            to = class,
            chunk_size,
            chunks = nchunk,
            "reassigned slab"
        );
    }

    /// Panics if freelists, recency lists and chunk states disagree.
    pub(crate) fn check_invariants(&self) {
        assert!(self.bytes_used() <= self.max_bytes);
        assert!(self.resident_bytes() <= self.bytes_used());
        for (idx, class) in self.classes.iter().enumerate() {
            let id = (idx + 1) as u8;
            let mut free = 0;
            let mut linked = 0;
            for slab in self.slabs.0.iter().filter(|slab| slab.class == id) {
                assert_eq!(slab.chunk_size, class.chunk_size);
                free += slab
                    .items
                    .iter()
                    .filter(|meta| meta.state == ChunkState::Free)
                    .count();
                linked += slab.items.iter().filter(|meta| meta.is_linked()).count();
            }
            assert_eq!(free, class.free.len(), "class {id} freelist length");
            assert_eq!(linked, class.lru.len(), "class {id} recency list length");
            for &chunk in &class.free {
                assert_eq!(self.item_class(chunk), id);
                assert_eq!(self.meta(chunk).state, ChunkState::Free);
            }
            let walked = class.lru.iter_rev(&self.slabs).count();
            assert_eq!(walked, class.lru.len(), "class {id} recency list walk");
            if class.lru.is_empty() {
                assert_eq!(class.lru.head(), None, "class {id} empty list has a head");
                assert_eq!(class.lru.tail(), None, "class {id} empty list has a tail");
            }
            if let Some(head) = class.lru.head() {
                assert_eq!(self.meta(head).lru.prev, None);
            }
            if let Some(tail) = class.lru.tail() {
                assert_eq!(self.meta(tail).lru.next, None);
            }
        }
    }
}
