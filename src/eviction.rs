//! Eviction Subsystem
//!
//! When a class has no free chunk and the budget cannot fund another slab,
//! the store asks the policy chosen at startup to make room:
//!
//! | Policy | Victim | Effect |
//! |--------|--------|--------|
//! | `None` | - | allocation fails with out-of-memory |
//! | `Lru` | tail of the requesting class's recency list | one chunk freed in that class |
//! | `RandomSlab` | a uniformly random slab | slab emptied and moved to the requesting class |
//! | `LeastRecentlyAccessedSlab` | slab with the oldest access stamp | same |
//! | `LeastRecentlyCreatedSlab` | slab with the oldest creation stamp | same |
//!
//! Pinned items are never evicted. The LRU walk skips them, looking at most
//! [`LRU_SEARCH_DEPTH`] items deep; slab policies skip any slab holding one.
//!
//! This module only picks victims. Unlinking them touches the hash index as
//! well as the allocator, so the store carries it out.

use core::fmt;
use core::str::FromStr;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::item::ItemId;
use crate::slab::SlabAllocator;

/// How far from the tail the LRU walk looks for an unpinned item.
pub const LRU_SEARCH_DEPTH: usize = 50;

/// Reclamation policy, fixed for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum EvictionPolicy {
    /// Fail allocations once memory is exhausted.
    None,
    /// Evict the least recently used item of the requesting class.
    #[default]
    Lru,
    /// Empty a random slab and give it to the requesting class.
    RandomSlab,
    /// Empty the slab accessed longest ago.
    LeastRecentlyAccessedSlab,
    /// Empty the slab created longest ago.
    LeastRecentlyCreatedSlab,
}

impl EvictionPolicy {
    /// Short name used in reports and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::None => "none",
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::RandomSlab => "random",
            EvictionPolicy::LeastRecentlyAccessedSlab => "lra",
            EvictionPolicy::LeastRecentlyCreatedSlab => "lrc",
        }
    }

    /// Numeric code echoed in `stats settings`.
    pub fn code(&self) -> u8 {
        match self {
            EvictionPolicy::None => 0,
            EvictionPolicy::Lru => 1,
            EvictionPolicy::RandomSlab => 2,
            EvictionPolicy::LeastRecentlyAccessedSlab => 4,
            EvictionPolicy::LeastRecentlyCreatedSlab => 8,
        }
    }

    /// Every policy, in code order.
    pub fn all() -> &'static [EvictionPolicy] {
        &[
            EvictionPolicy::None,
            EvictionPolicy::Lru,
            EvictionPolicy::RandomSlab,
            EvictionPolicy::LeastRecentlyAccessedSlab,
            EvictionPolicy::LeastRecentlyCreatedSlab,
        ]
    }

    /// True for the policies that reassign whole slabs.
    pub fn is_slab_level(&self) -> bool {
        matches!(
            self,
            EvictionPolicy::RandomSlab
                | EvictionPolicy::LeastRecentlyAccessedSlab
                | EvictionPolicy::LeastRecentlyCreatedSlab
        )
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(EvictionPolicy::None),
            "lru" => Ok(EvictionPolicy::Lru),
            "random" | "rs" => Ok(EvictionPolicy::RandomSlab),
            "lra" | "as" => Ok(EvictionPolicy::LeastRecentlyAccessedSlab),
            "lrc" | "cs" => Ok(EvictionPolicy::LeastRecentlyCreatedSlab),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

/// What the LRU walk found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Victim {
    /// Already expired, reclaim without counting an eviction.
    Expired(ItemId),
    /// Live item to evict.
    Live(ItemId),
}

/// Walks up to [`LRU_SEARCH_DEPTH`] items from the LRU end of `class`.
///
/// The first expired unpinned item wins; failing that, the first unpinned
/// one.
pub(crate) fn lru_victim(slabs: &SlabAllocator, class: u8, now: u32) -> Option<Victim> {
    let mut live = None;
    for id in slabs.lru_iter(class).take(LRU_SEARCH_DEPTH) {
        let meta = slabs.meta(id);
        if meta.refcount > 0 {
            continue;
        }
        if meta.is_expired(now) {
            return Some(Victim::Expired(id));
        }
        live.get_or_insert(id);
    }
    live.map(Victim::Live)
}

/// Slab selection state for the slab-level policies.
#[derive(Debug)]
pub(crate) struct Evictor {
    policy: EvictionPolicy,
    rng: SmallRng,
}

impl Evictor {
    pub(crate) fn new(policy: EvictionPolicy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self { policy, rng }
    }

    pub(crate) fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Picks a slab holding no pinned or in-flight chunk.
    pub(crate) fn select_slab(&mut self, slabs: &SlabAllocator) -> Option<u32> {
        let candidates = slabs.slab_stamps().filter(|stamp| stamp.evictable);
        match self.policy {
            EvictionPolicy::RandomSlab => {
                let candidates: Vec<_> = candidates.collect();
                candidates.choose(&mut self.rng).map(|stamp| stamp.id)
            }
            EvictionPolicy::LeastRecentlyAccessedSlab => candidates
                .min_by_key(|stamp| (stamp.accessed, stamp.id))
                .map(|stamp| stamp.id),
            EvictionPolicy::LeastRecentlyCreatedSlab => candidates
                .min_by_key(|stamp| (stamp.created, stamp.id))
                .map(|stamp| stamp.id),
            EvictionPolicy::None | EvictionPolicy::Lru => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ChunkState;
    use crate::size_class::SizeClassTable;

    #[test]
    fn test_policy_names_round_trip() {
        for policy in EvictionPolicy::all() {
            assert_eq!(policy.as_str().parse::<EvictionPolicy>(), Ok(*policy));
        }
        assert_eq!(
            "RS".parse::<EvictionPolicy>(),
            Ok(EvictionPolicy::RandomSlab)
        );
        assert!("fifo".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::Lru);
        assert!(!EvictionPolicy::Lru.is_slab_level());
        assert!(EvictionPolicy::LeastRecentlyCreatedSlab.is_slab_level());
    }

    // full slabs of class 1 (64 byte chunks, 16 per slab), slab i created at tick i + 1
    fn full_slabs(count: usize) -> SlabAllocator {
        let mut slabs =
            SlabAllocator::new(SizeClassTable::from_profile(&[64, 512]), 1024, count * 1024);
        for tick in 1..=count as u64 {
            for _ in 0..16 {
                let id = slabs.alloc(1, tick).unwrap();
                slabs.meta_mut(id).state = ChunkState::Linked;
                slabs.lru_attach(id);
            }
        }
        slabs
    }

    fn three_slabs() -> SlabAllocator {
        full_slabs(3)
    }

    #[test]
    fn test_lru_victim_skips_pinned() {
        let mut slabs = three_slabs();
        let tail: Vec<ItemId> = slabs.lru_iter(1).take(2).collect();
        assert_eq!(lru_victim(&slabs, 1, 0), Some(Victim::Live(tail[0])));

        slabs.meta_mut(tail[0]).refcount = 1;
        assert_eq!(lru_victim(&slabs, 1, 0), Some(Victim::Live(tail[1])));

        slabs.meta_mut(tail[1]).exptime = 10;
        assert_eq!(lru_victim(&slabs, 1, 10), Some(Victim::Expired(tail[1])));
    }

    #[test]
    fn test_lru_victim_prefers_expired() {
        let mut slabs = full_slabs(4);
        let order: Vec<ItemId> = slabs.lru_iter(1).collect();
        slabs.meta_mut(order[7]).exptime = 5;
        slabs.meta_mut(order[9]).exptime = 5;
        assert_eq!(lru_victim(&slabs, 1, 4), Some(Victim::Live(order[0])));
        assert_eq!(lru_victim(&slabs, 1, 5), Some(Victim::Expired(order[7])));

        // beyond the search depth an expired item is not found
        slabs.meta_mut(order[7]).exptime = 0;
        slabs.meta_mut(order[9]).exptime = 0;
        slabs.meta_mut(order[LRU_SEARCH_DEPTH]).exptime = 5;
        assert_eq!(lru_victim(&slabs, 1, 5), Some(Victim::Live(order[0])));
    }

    #[test]
    fn test_lru_victim_depth_is_bounded() {
        let mut slabs = full_slabs(4);
        let order: Vec<ItemId> = slabs.lru_iter(1).collect();
        for &id in order.iter().take(LRU_SEARCH_DEPTH) {
            slabs.meta_mut(id).refcount = 1;
        }
        assert_eq!(lru_victim(&slabs, 1, 0), None);
        assert_eq!(lru_victim(&slabs, 2, 0), None);
    }

    #[test]
    fn test_least_recently_created() {
        let slabs = three_slabs();
        let mut evictor = Evictor::new(EvictionPolicy::LeastRecentlyCreatedSlab, None);
        assert_eq!(evictor.select_slab(&slabs), Some(0));
    }

    #[test]
    fn test_least_recently_accessed() {
        let mut slabs = three_slabs();
        slabs.touch_slab(0, 10);
        slabs.touch_slab(2, 11);
        let mut evictor = Evictor::new(EvictionPolicy::LeastRecentlyAccessedSlab, None);
        assert_eq!(evictor.select_slab(&slabs), Some(1));
    }

    #[test]
    fn test_pinned_slab_is_skipped() {
        let mut slabs = three_slabs();
        let in_slab_zero = slabs.lru_iter(1).next().unwrap();
        assert_eq!(in_slab_zero.slab(), 0);
        slabs.meta_mut(in_slab_zero).refcount = 1;

        let mut evictor = Evictor::new(EvictionPolicy::LeastRecentlyCreatedSlab, None);
        assert_eq!(evictor.select_slab(&slabs), Some(1));
    }

    #[test]
    fn test_random_is_reproducible() {
        let slabs = three_slabs();
        let picks = |seed| {
            let mut evictor = Evictor::new(EvictionPolicy::RandomSlab, Some(seed));
            (0..16)
                .map(|_| evictor.select_slab(&slabs).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
        assert!(picks(42).iter().all(|&slab| slab < 3));
    }

    #[test]
    fn test_item_policies_never_pick_slabs() {
        let slabs = three_slabs();
        assert_eq!(Evictor::new(EvictionPolicy::Lru, None).select_slab(&slabs), None);
        assert_eq!(Evictor::new(EvictionPolicy::None, None).select_slab(&slabs), None);
    }
}
