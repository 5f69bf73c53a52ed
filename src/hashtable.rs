//! Hash Index
//!
//! A chained hash table from key to [`ItemId`]. Buckets hold the head of a
//! singly linked chain threaded through each item's `hnext` field, so the
//! table itself is one `Option<ItemId>` per bucket and inserting never
//! allocates.
//!
//! The bucket of an item is `hash & (2^power - 1)`, where the hash is computed
//! once by the store and its low 32 bits kept in the item metadata. When the table autotunes
//! (configured power 0) it starts at 2^[`HASH_DEFAULT_POWER`] buckets and
//! doubles whenever the item count exceeds 1.5x the bucket count. Growth
//! rehashes every chain in one pass; the store holds its lock for the
//! duration, so no lookup ever sees a half-moved table.

use std::mem;

use tracing::info;

use crate::error::DuplicateKey;
use crate::item::ItemId;
use crate::slab::SlabAllocator;

/// Starting power of an autotuned table.
pub const HASH_DEFAULT_POWER: u8 = 16;
/// Largest power a table may reach.
pub const HASH_MAX_POWER: u8 = 32;

/// Bucket array of the index.
#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<Option<ItemId>>,
    power: u8,
    autotune: bool,
    items: usize,
    expansions: u64,
}

impl HashTable {
    /// Creates a table of `2^hash_power` buckets, or an autotuned table
    /// starting at [`HASH_DEFAULT_POWER`] when `hash_power` is 0.
    pub fn new(hash_power: u8) -> Self {
        let (power, autotune) = match hash_power {
            0 => (HASH_DEFAULT_POWER, true),
            power => (power.min(HASH_MAX_POWER), false),
        };
        Self {
            buckets: vec![None; 1usize << power],
            power,
            autotune,
            items: 0,
            expansions: 0,
        }
    }

    /// Current power.
    pub fn power(&self) -> u8 {
        self.power
    }

    /// Number of buckets.
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.items
    }

    /// True if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// How many times the table has doubled.
    pub fn expansions(&self) -> u64 {
        self.expansions
    }

    #[inline]
    fn bucket(&self, hash: u32) -> usize {
        (u64::from(hash) & ((1u64 << self.power) - 1)) as usize
    }

    /// Looks up `key`.
    pub(crate) fn find(&self, key: &[u8], hash: u32, slabs: &SlabAllocator) -> Option<ItemId> {
        let mut cursor = self.buckets[self.bucket(hash)];
        while let Some(id) = cursor {
            let meta = slabs.meta(id);
            if meta.hash == hash && slabs.key(id) == key {
                return Some(id);
            }
            cursor = meta.hnext;
        }
        None
    }

    /// Indexes `id` under the key and hash stored in its chunk.
    pub(crate) fn insert(
        &mut self,
        id: ItemId,
        slabs: &mut SlabAllocator,
    ) -> Result<(), DuplicateKey> {
        let hash = slabs.meta(id).hash;
        if self.find(slabs.key(id), hash, slabs).is_some() {
            return Err(DuplicateKey);
        }

        let bucket = self.bucket(hash);
        slabs.meta_mut(id).hnext = self.buckets[bucket];
        self.buckets[bucket] = Some(id);
        self.items += 1;

        if self.autotune && self.items > self.buckets.len() * 3 / 2 && self.power < HASH_MAX_POWER
        {
            self.expand(slabs);
        }
        Ok(())
    }

    /// Removes `key`, returning the item that held it.
    pub(crate) fn remove(
        &mut self,
        key: &[u8],
        hash: u32,
        slabs: &mut SlabAllocator,
    ) -> Option<ItemId> {
        let id = self.find(key, hash, slabs)?;
        self.remove_item(id, slabs);
        Some(id)
    }

    /// Removes the specific item `id`. Returns false if it was not indexed.
    pub(crate) fn remove_item(&mut self, id: ItemId, slabs: &mut SlabAllocator) -> bool {
        let bucket = self.bucket(slabs.meta(id).hash);
        let mut prev: Option<ItemId> = None;
        let mut cursor = self.buckets[bucket];

        while let Some(current) = cursor {
            let next = slabs.meta(current).hnext;
            if current == id {
                match prev {
                    Some(prev) => slabs.meta_mut(prev).hnext = next,
                    None => self.buckets[bucket] = next,
                }
                slabs.meta_mut(id).hnext = None;
                self.items -= 1;
                return true;
            }
            prev = Some(current);
            cursor = next;
        }
        false
    }

    fn expand(&mut self, slabs: &mut SlabAllocator) {
        let power = self.power + 1;
        let mask = (1u64 << power) - 1;
        let mut buckets = vec![None; 1usize << power];

        for head in mem::take(&mut self.buckets) {
            let mut cursor = head;
            while let Some(id) = cursor {
                let meta = slabs.meta_mut(id);
                cursor = meta.hnext;
                let bucket = (u64::from(meta.hash) & mask) as usize;
                meta.hnext = buckets[bucket];
                buckets[bucket] = Some(id);
            }
        }

        self.buckets = buckets;
        self.power = power;
        self.expansions += 1;
        info!(
            power,
            buckets = self.buckets.len(),
            items = self.items,
            "expanded hash table"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ChunkState;
    use crate::size_class::SizeClassTable;

    fn allocator() -> SlabAllocator {
        // one 64 byte class, 64 slabs of 16 chunks
        SlabAllocator::new(SizeClassTable::from_profile(&[64]), 1024, 64 * 1024)
    }

    fn store_key(slabs: &mut SlabAllocator, key: &[u8], hash: u32) -> ItemId {
        let id = slabs.alloc(1, 1).unwrap();
        slabs.set_key(id, key);
        let meta = slabs.meta_mut(id);
        meta.hash = hash;
        meta.state = ChunkState::Linked;
        id
    }

    #[test]
    fn test_insert_find_remove() {
        let mut slabs = allocator();
        let mut table = HashTable::new(4);
        let a = store_key(&mut slabs, b"a", 1);
        let b = store_key(&mut slabs, b"b", 2);

        table.insert(a, &mut slabs).unwrap();
        table.insert(b, &mut slabs).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(b"a", 1, &slabs), Some(a));
        assert_eq!(table.find(b"b", 2, &slabs), Some(b));
        assert_eq!(table.find(b"c", 3, &slabs), None);

        assert_eq!(table.remove(b"a", 1, &mut slabs), Some(a));
        assert_eq!(table.find(b"a", 1, &slabs), None);
        assert_eq!(table.remove(b"a", 1, &mut slabs), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut slabs = allocator();
        let mut table = HashTable::new(4);
        let first = store_key(&mut slabs, b"dup", 7);
        let second = store_key(&mut slabs, b"dup", 7);

        table.insert(first, &mut slabs).unwrap();
        assert_eq!(table.insert(second, &mut slabs), Err(DuplicateKey));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_colliding_chain() {
        let mut slabs = allocator();
        let mut table = HashTable::new(2);
        // same bucket, different hashes and one identical hash
        let ids: Vec<ItemId> = [(b"k1", 4u32), (b"k2", 8), (b"k3", 8)]
            .iter()
            .map(|(key, hash)| store_key(&mut slabs, *key, *hash))
            .collect();
        for &id in &ids {
            table.insert(id, &mut slabs).unwrap();
        }

        assert_eq!(table.find(b"k2", 8, &slabs), Some(ids[1]));
        assert_eq!(table.find(b"k3", 8, &slabs), Some(ids[2]));

        // remove from the middle of the chain
        assert!(table.remove_item(ids[1], &mut slabs));
        assert!(!table.remove_item(ids[1], &mut slabs));
        assert_eq!(table.find(b"k1", 4, &slabs), Some(ids[0]));
        assert_eq!(table.find(b"k3", 8, &slabs), Some(ids[2]));
        assert_eq!(table.find(b"k2", 8, &slabs), None);
    }

    #[test]
    fn test_fixed_power_never_grows() {
        let mut slabs = allocator();
        let mut table = HashTable::new(2);
        for i in 0..20u32 {
            let key = format!("key{i}");
            let id = store_key(&mut slabs, key.as_bytes(), i);
            table.insert(id, &mut slabs).unwrap();
        }
        assert_eq!(table.power(), 2);
        assert_eq!(table.buckets(), 4);
        assert_eq!(table.expansions(), 0);
    }

    #[test]
    fn test_autotune_expands_and_keeps_entries() {
        let mut slabs = SlabAllocator::new(
            SizeClassTable::from_profile(&[64]),
            1024,
            8 * 1024 * 1024,
        );
        let mut table = HashTable::new(0);
        assert_eq!(table.power(), HASH_DEFAULT_POWER);

        let count = (1usize << HASH_DEFAULT_POWER) * 3 / 2 + 1;
        let mut ids = Vec::with_capacity(count);
        for i in 0..count as u32 {
            let key = format!("k{i}");
            // spread hashes over the upper bits too
            let hash = i.wrapping_mul(0x9E37_79B9);
            let id = store_key(&mut slabs, key.as_bytes(), hash);
            table.insert(id, &mut slabs).unwrap();
            ids.push((key, hash, id));
        }

        assert_eq!(table.power(), HASH_DEFAULT_POWER + 1);
        assert_eq!(table.expansions(), 1);
        assert_eq!(table.len(), count);
        for (key, hash, id) in &ids {
            assert_eq!(table.find(key.as_bytes(), *hash, &slabs), Some(*id));
        }
    }
}
