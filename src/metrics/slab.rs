//! Per-class counters.

use std::collections::BTreeMap;

/// Counters kept by every slab class.
#[derive(Debug, Default, Clone)]
pub struct SlabClassMetrics {
    /// Chunks handed out by the allocator
    pub allocations: u64,
    /// Live items evicted from this class
    pub evictions: u64,
    /// Expired items reused before lookup
    pub reclaimed: u64,
    /// Slabs taken from this class by slab-level eviction
    pub slabs_lost: u64,
    /// Slabs given to this class by slab-level eviction
    pub slabs_gained: u64,
}

impl SlabClassMetrics {
    /// Writes the counters under `<prefix>.<name>`.
    pub fn extend_btreemap(&self, prefix: &str, metrics: &mut BTreeMap<String, f64>) {
        metrics.insert(format!("{prefix}.allocations"), self.allocations as f64);
        metrics.insert(format!("{prefix}.evictions"), self.evictions as f64);
        metrics.insert(format!("{prefix}.reclaimed"), self.reclaimed as f64);
        metrics.insert(format!("{prefix}.slabs_lost"), self.slabs_lost as f64);
        metrics.insert(format!("{prefix}.slabs_gained"), self.slabs_gained as f64);
    }
}
