//! Eviction Policy Demonstration
//!
//! Runs the same workload against every eviction policy and prints the
//! metrics side by side. The workload shifts from small to large items half
//! way through, which is where slab-level policies pull ahead of per-class
//! LRU: LRU cannot move memory that small items already claimed.
//!
//! Run with: cargo run --example eviction_policies

use slabcache::{CacheMetrics, EngineConfig, EvictionPolicy, StatsKind, Store};
use std::collections::BTreeMap;

const MAX_BYTES: usize = 4 * 1024 * 1024;

fn run(policy: EvictionPolicy) -> Store {
    let config = EngineConfig {
        slab_size: 256 * 1024,
        max_chunk_size: 256 * 1024,
        max_bytes: MAX_BYTES,
        eviction: policy,
        eviction_seed: Some(2024),
        ..Default::default()
    };
    let mut store = Store::new(config).expect("valid configuration");

    // phase 1: many small items
    for i in 0..50_000 {
        store.set(format!("small:{i}").as_bytes(), &[b's'; 80], 0, 0);
    }
    // phase 2: fewer, larger items, read back as they are written
    for i in 0..5_000 {
        let key = format!("large:{i}");
        store.set(key.as_bytes(), &[b'l'; 4000], 0, 0);
        store.get(format!("large:{}", i / 2).as_bytes());
    }
    store
}

fn main() {
    println!("Eviction Policy Comparison");
    println!("==========================\n");
    println!("   budget: {} bytes\n", MAX_BYTES);

    let stores: Vec<(EvictionPolicy, Store)> = EvictionPolicy::all()
        .iter()
        .map(|&policy| (policy, run(policy)))
        .collect();

    display_metrics_comparison(&stores);

    println!("\nPer-class occupancy under {}:", stores[2].0);
    for (key, value) in stores[2].1.stats(StatsKind::Items) {
        println!("   {key:<24} {value}");
    }
}

fn display_metrics_comparison(stores: &[(EvictionPolicy, Store)]) {
    let rows = [
        "curr_items",
        "evictions",
        "slab_evictions",
        "out_of_memory",
        "hit_rate",
        "bytes_used",
    ];
    let reports: Vec<BTreeMap<String, f64>> =
        stores.iter().map(|(_, store)| store.metrics()).collect();

    print!("{:<16}", "metric");
    for (_, store) in stores {
        print!("{:>12}", store.policy_name());
    }
    println!();

    for row in rows {
        print!("{row:<16}");
        for report in &reports {
            let value = report.get(row).copied().unwrap_or(0.0);
            if row == "hit_rate" {
                print!("{:>11.1}%", value * 100.0);
            } else {
                print!("{value:>12}");
            }
        }
        println!();
    }
}
