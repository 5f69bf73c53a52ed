//! Stress Tests for the Concurrent Store
//!
//! These tests verify thread safety and structural consistency under high
//! contention and memory pressure.

#![cfg(feature = "concurrent")]

use slabcache::{ConcurrentStore, EngineConfig, EvictionPolicy, Request, Response};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const NUM_THREADS: usize = 16;
const OPS_PER_THREAD: usize = 10_000;

fn store_with(policy: EvictionPolicy, max_bytes: usize) -> Arc<ConcurrentStore> {
    let config = EngineConfig {
        slab_size: 64 * 1024,
        max_chunk_size: 64 * 1024,
        max_bytes,
        eviction: policy,
        eviction_seed: Some(5),
        ..Default::default()
    };
    Arc::new(ConcurrentStore::new(config).unwrap())
}

/// Many threads hammering the same few keys
#[test]
fn stress_high_contention() {
    let store = store_with(EvictionPolicy::Lru, 4 * 1024 * 1024);

    let mut handles = Vec::new();
    for t in 0..NUM_THREADS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let key = format!("key_{}", i % 10);
                if t % 2 == 0 {
                    let value = format!("{t}:{i}");
                    assert_eq!(
                        store.set(key.as_bytes(), value.as_bytes(), 0, 0),
                        Response::Stored
                    );
                } else {
                    let _ = store.get(key.as_bytes());
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert!(store.len() <= 10);
    store.check_invariants();
}

/// Mixed SET/GET/DELETE over a key space larger than memory, every policy
#[test]
fn stress_mixed_operations_under_pressure() {
    for &policy in EvictionPolicy::all() {
        let store = store_with(policy, 1024 * 1024);

        let mut handles = Vec::new();
        for t in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..5000usize {
                    let key = format!("key_{}", (i * 7 + t * 13) % 2000);
                    match i % 4 {
                        0 | 1 => {
                            let value = vec![b'a' + (t as u8); 100 + (i % 50) * 40];
                            match store.set(key.as_bytes(), &value, t as u32, 0) {
                                Response::Stored | Response::OutOfMemory => {}
                                other => panic!("{policy}: unexpected {other:?}"),
                            }
                        }
                        2 => {
                            let _ = store.get(key.as_bytes());
                        }
                        _ => {
                            let _ = store.delete(key.as_bytes());
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert!(store.bytes_used() <= 1024 * 1024, "{policy}");
        store.check_invariants();
    }
}

/// Readers holding pinned items while writers churn the same class
#[test]
fn stress_pinned_items_under_eviction() {
    let store = store_with(EvictionPolicy::Lru, 256 * 1024);
    for i in 0..100 {
        store.set(format!("key_{i}").as_bytes(), format!("value_{i}").as_bytes(), 0, 0);
    }

    let mismatches = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for t in 0..NUM_THREADS {
        let store = Arc::clone(&store);
        let mismatches = Arc::clone(&mismatches);
        handles.push(thread::spawn(move || {
            for i in 0..2000 {
                let n = (i + t) % 100;
                if t % 4 == 0 {
                    let key = format!("key_{n}");
                    store.set(key.as_bytes(), format!("value_{n}").as_bytes(), 0, 0);
                    store.set(format!("filler_{t}_{i}").as_bytes(), &[0u8; 200], 0, 0);
                } else if let Some(item) = store.get_ref(format!("key_{n}").as_bytes()) {
                    // the pinned value never changes under us
                    let before = item.to_vec();
                    thread::yield_now();
                    if item.to_vec() != before || before != format!("value_{n}").into_bytes() {
                        mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(mismatches.load(Ordering::Relaxed), 0);
    store.check_invariants();
}

/// Flushes racing with stores
#[test]
fn stress_flush_all() {
    let store = store_with(EvictionPolicy::Lru, 4 * 1024 * 1024);

    let mut handles = Vec::new();
    for t in 0..8 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..2000 {
                if t == 0 && i % 100 == 0 {
                    assert_eq!(store.execute(Request::FlushAll), Response::Ok);
                } else {
                    store.set(format!("key_{t}_{i}").as_bytes(), b"v", 0, 0);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    store.check_invariants();
}

/// Operations on an empty store
#[test]
fn stress_empty_store() {
    let store = store_with(EvictionPolicy::Lru, 1024 * 1024);

    let mut handles = Vec::new();
    for _ in 0..NUM_THREADS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..1000 {
                let key = format!("missing_{i}");
                assert_eq!(store.get(key.as_bytes()), None);
                assert_eq!(store.delete(key.as_bytes()), Response::NotFound);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert!(store.is_empty());
    assert_eq!(store.bytes_used(), 0);
}
