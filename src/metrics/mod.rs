//! Engine Metrics
//!
//! Counters the engine keeps while serving requests, exposed as
//! `BTreeMap<String, f64>` so reports always list keys in the same order.
//! That makes stats output diffable between runs and lets the simulator export
//! CSV with a stable column order.
//!
//! [`EngineMetrics`] holds the engine-wide counters, [`SlabClassMetrics`] the
//! per-class ones. Gauges that are cheaper to compute than to track (bytes
//! used, slab counts, free chunks) are filled in by the store when a report is
//! assembled.

use std::collections::BTreeMap;

pub mod slab;

pub use slab::SlabClassMetrics;

/// Engine-wide counters.
#[derive(Debug, Default, Clone)]
pub struct EngineMetrics {
    /// GET lookups, one per key for multi-key requests
    pub cmd_get: u64,
    /// Lookups that found a live item
    pub get_hits: u64,
    /// Store requests of every kind (SET, ADD, REPLACE, CAS)
    pub cmd_set: u64,
    /// CAS on a missing key
    pub cas_misses: u64,
    /// CAS that stored
    pub cas_hits: u64,
    /// CAS rejected for a stale token
    pub cas_badval: u64,
    /// DELETE that removed an item
    pub delete_hits: u64,
    /// DELETE on a missing key
    pub delete_misses: u64,
    /// INCR that found its key
    pub incr_hits: u64,
    /// INCR on a missing key
    pub incr_misses: u64,
    /// DECR that found its key
    pub decr_hits: u64,
    /// DECR on a missing key
    pub decr_misses: u64,
    /// Linked items right now
    pub curr_items: u64,
    /// Items ever linked
    pub total_items: u64,
    /// Header + key + suffix + value bytes of linked items
    pub bytes: u64,
    /// Live items evicted to make room
    pub evictions: u64,
    /// Slabs emptied and reassigned
    pub slab_evictions: u64,
    /// Expired items removed when a lookup found them
    pub expired: u64,
    /// Expired items reused by the allocator before anyone looked them up
    pub reclaimed: u64,
    /// Store requests rejected for lack of memory
    pub out_of_memory: u64,
    /// Store requests rejected for exceeding the largest chunk
    pub oversize: u64,
    /// FLUSH_ALL requests
    pub cmd_flush: u64,
}

impl EngineMetrics {
    /// Records a lookup that found a live item.
    pub fn record_hit(&mut self) {
        self.cmd_get += 1;
        self.get_hits += 1;
    }

    /// Records a lookup that found nothing.
    pub fn record_miss(&mut self) {
        self.cmd_get += 1;
    }

    /// Records an item becoming reachable.
    pub fn record_link(&mut self, ntotal: usize) {
        self.curr_items += 1;
        self.total_items += 1;
        self.bytes += ntotal as u64;
    }

    /// Records an item leaving the index.
    pub fn record_unlink(&mut self, ntotal: usize) {
        self.curr_items -= 1;
        self.bytes -= ntotal as u64;
    }

    /// Records an in-place overwrite of a linked item.
    pub fn record_overwrite(&mut self, old_ntotal: usize, new_ntotal: usize) {
        self.total_items += 1;
        self.bytes = self.bytes - old_ntotal as u64 + new_ntotal as u64;
    }

    /// Lookup misses, derived.
    pub fn get_misses(&self) -> u64 {
        self.cmd_get - self.get_hits
    }

    /// Fraction of lookups that hit, 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        if self.cmd_get > 0 {
            self.get_hits as f64 / self.cmd_get as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a report map.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("cmd_get".to_string(), self.cmd_get as f64);
        metrics.insert("get_hits".to_string(), self.get_hits as f64);
        metrics.insert("get_misses".to_string(), self.get_misses() as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("cmd_set".to_string(), self.cmd_set as f64);
        metrics.insert("cmd_flush".to_string(), self.cmd_flush as f64);

        metrics.insert("cas_misses".to_string(), self.cas_misses as f64);
        metrics.insert("cas_hits".to_string(), self.cas_hits as f64);
        metrics.insert("cas_badval".to_string(), self.cas_badval as f64);
        metrics.insert("delete_hits".to_string(), self.delete_hits as f64);
        metrics.insert("delete_misses".to_string(), self.delete_misses as f64);
        metrics.insert("incr_hits".to_string(), self.incr_hits as f64);
        metrics.insert("incr_misses".to_string(), self.incr_misses as f64);
        metrics.insert("decr_hits".to_string(), self.decr_hits as f64);
        metrics.insert("decr_misses".to_string(), self.decr_misses as f64);

        metrics.insert("curr_items".to_string(), self.curr_items as f64);
        metrics.insert("total_items".to_string(), self.total_items as f64);
        metrics.insert("bytes".to_string(), self.bytes as f64);

        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("slab_evictions".to_string(), self.slab_evictions as f64);
        metrics.insert("expired".to_string(), self.expired as f64);
        metrics.insert("reclaimed".to_string(), self.reclaimed as f64);
        metrics.insert("out_of_memory".to_string(), self.out_of_memory as f64);
        metrics.insert("oversize".to_string(), self.oversize as f64);

        metrics
    }
}

/// Uniform metrics interface over engines.
///
/// The simulator uses it to compare a store under different eviction policies
/// without knowing which one it is talking to.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name of the eviction policy in effect (e.g. "lru", "random").
    fn policy_name(&self) -> &'static str;
}
