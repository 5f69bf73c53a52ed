//! Concurrent Store Usage Examples
//!
//! Multi-threaded usage patterns for the lock-guarded store.
//!
//! Run with: cargo run --example concurrent_usage

extern crate slabcache;

use slabcache::{CacheMetrics, ConcurrentStore, EngineConfig, EvictionPolicy, Request, Response};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("Concurrent Store Usage Examples");
    println!("===============================\n");

    basic_concurrent_usage();
    println!();

    zero_copy_get_with();
    println!();

    pinned_items();
    println!();

    atomic_counters();
    println!();

    throughput_by_thread_count();
}

fn make_store(max_bytes: usize) -> Arc<ConcurrentStore> {
    let config = EngineConfig {
        max_bytes,
        eviction: EvictionPolicy::Lru,
        ..Default::default()
    };
    Arc::new(ConcurrentStore::new(config).expect("valid configuration"))
}

/// Basic multi-threaded store usage
fn basic_concurrent_usage() {
    println!("1. Basic Concurrent Usage");
    println!("   -----------------------");

    let store = make_store(16 * 1024 * 1024);
    let num_threads = 4;
    let ops_per_thread = 1000;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = format!("thread{thread_id}-key{i}");
                    let value = format!("{}", thread_id * 10000 + i);
                    store.set(key.as_bytes(), value.as_bytes(), 0, 0);
                    assert_eq!(store.get(key.as_bytes()), Some(value.into_bytes()));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    println!("   {} threads stored {} items", num_threads, store.len());
    println!("   bytes used: {}", store.bytes_used());
}

/// Reading values under the lock without copying them out
fn zero_copy_get_with() {
    println!("2. Zero-Copy get_with");
    println!("   -------------------");

    let store = make_store(16 * 1024 * 1024);
    store.set(b"document", "lorem ipsum ".repeat(100).as_bytes(), 0, 0);

    let words = store.get_with(b"document", |item| {
        item.value.split(|&b| b == b' ').filter(|w| !w.is_empty()).count()
    });
    println!("   words in document: {:?}", words);
}

/// Pinned handles outlive overwrites and deletes
fn pinned_items() {
    println!("3. Pinned Items");
    println!("   -------------");

    let store = make_store(16 * 1024 * 1024);
    store.set(b"config", b"version=1", 0, 0);

    let Some(pinned) = store.get_ref(b"config") else {
        return;
    };
    store.set(b"config", b"version=2", 0, 0);
    store.delete(b"config");

    println!(
        "   pinned value: {}",
        String::from_utf8_lossy(&pinned.to_vec())
    );
    println!("   live value:   {:?}", store.get(b"config"));
}

/// INCR is atomic across threads
fn atomic_counters() {
    println!("4. Atomic Counters");
    println!("   ---------------");

    let store = make_store(16 * 1024 * 1024);
    store.set(b"hits", b"0", 0, 0);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..1000 {
                    store.execute(Request::Incr {
                        key: b"hits",
                        delta: 1,
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    if let Response::Found(value) = store.execute(Request::Get { key: b"hits" }) {
        println!("   hits: {}", String::from_utf8_lossy(&value.data));
    }
}

/// Throughput as the number of threads grows
fn throughput_by_thread_count() {
    println!("5. Throughput by Thread Count");
    println!("   --------------------------");

    for threads in [1, 2, 4, 8] {
        let store = make_store(8 * 1024 * 1024);
        let ops_per_thread = 50_000;
        let start = Instant::now();

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..ops_per_thread {
                        let key = format!("key:{}", (t * 7919 + i) % 20_000);
                        if i % 4 == 0 {
                            store.set(key.as_bytes(), &[b'x'; 200], 0, 0);
                        } else {
                            store.get(key.as_bytes());
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let elapsed = start.elapsed();
        let total = threads * ops_per_thread;
        let metrics = store.metrics();
        println!(
            "   {threads:>2} threads: {:>10.0} ops/s, hit rate {:.1}%, evictions {}",
            total as f64 / elapsed.as_secs_f64(),
            metrics["hit_rate"] * 100.0,
            metrics["evictions"]
        );
    }
}
