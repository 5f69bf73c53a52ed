#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Engine Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      ConcurrentStore (Mutex)                         │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │                            Store                               │  │
//! │  │   execute(Request) ──▶ Response                                │  │
//! │  │                                                                │  │
//! │  │   ┌────────────┐   ┌──────────────┐   ┌─────────────────────┐  │  │
//! │  │   │ HashTable  │──▶│ SlabAllocator│◀──│ Evictor             │  │  │
//! │  │   │ key → Id   │   │ slabs, lists │   │ lru / random / lra  │  │  │
//! │  │   └────────────┘   └──────┬───────┘   │ / lrc / none        │  │  │
//! │  │                           │           └─────────────────────┘  │  │
//! │  │                   ┌───────▼────────┐                           │  │
//! │  │                   │ SizeClassTable │                           │  │
//! │  │                   └────────────────┘                           │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Role |
//! |------|------|
//! | [`Store`] | Single-threaded engine, owns all state |
//! | [`ConcurrentStore`] | `Store` behind one lock, shareable across threads |
//! | [`EngineConfig`] | Startup configuration |
//! | [`EvictionPolicy`] | Reclamation policy under memory pressure |
//! | [`Request`] / [`Response`] | The command boundary |
//! | [`ItemRef`] | Pinned item handle of a `ConcurrentStore` |
//!
//! ## Eviction Policies
//!
//! | Policy | Reclaims | Unit | Moves memory between classes |
//! |--------|----------|------|------------------------------|
//! | `None` | nothing | - | no |
//! | `Lru` | least recently used item of the class | item | no |
//! | `RandomSlab` | a random slab | slab | yes |
//! | `LeastRecentlyAccessedSlab` | the coldest slab | slab | yes |
//! | `LeastRecentlyCreatedSlab` | the oldest slab | slab | yes |
//!
//! ## Example
//!
//! ```rust
//! use slabcache::{EngineConfig, EvictionPolicy, Request, Response, Store};
//!
//! let config = EngineConfig {
//!     max_bytes: 8 * 1024 * 1024,
//!     eviction: EvictionPolicy::Lru,
//!     ..Default::default()
//! };
//! let mut store = Store::new(config).unwrap();
//!
//! store.set(b"counter", b"41", 0, 0);
//! assert_eq!(
//!     store.execute(Request::Incr { key: b"counter", delta: 1 }),
//!     Response::Numeric(42)
//! );
//!
//! let token = match store.execute(Request::Get { key: b"counter" }) {
//!     Response::Found(value) => value.cas,
//!     other => panic!("unexpected {other:?}"),
//! };
//! let cas = Request::Cas {
//!     key: b"counter",
//!     value: b"0",
//!     flags: 0,
//!     exptime: 0,
//!     cas: token,
//! };
//! assert_eq!(store.execute(cas), Response::Stored);
//! assert_eq!(store.execute(cas), Response::CasMismatch);
//! ```

#[cfg(test)]
extern crate scoped_threadpool;

/// Error types.
pub mod error;

/// Item record format, key rules and sizing.
pub mod item;

/// Intrusive doubly linked list over item ids.
///
/// Internal infrastructure for the per-class recency lists.
pub(crate) mod list;

/// Clock abstraction and protocol expiry conversion.
pub mod time;

/// Size-class table.
pub mod size_class;

/// Engine configuration.
pub mod config;

/// Slab allocator: slabs, chunks, freelists and recency lists.
pub mod slab;

/// Chained hash index from key to item.
pub mod hashtable;

/// Eviction policies and victim selection.
pub mod eviction;

/// The single-threaded engine.
pub mod store;

/// Requests, responses and statistics reports.
pub mod command;

/// Engine counters and the [`CacheMetrics`] reporting trait.
pub mod metrics;

/// Thread-safe engine.
///
/// Available when the `concurrent` feature is enabled.
#[cfg(feature = "concurrent")]
pub mod concurrent;

pub use command::{Request, Response, StatsKind, Value};
pub use config::{EngineConfig, NetworkConfig};
pub use error::{AllocError, ClientError, ConfigError, DuplicateKey};
pub use eviction::EvictionPolicy;
pub use item::{ItemId, ItemView};
pub use metrics::{CacheMetrics, EngineMetrics};
pub use store::Store;
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(feature = "concurrent")]
pub use concurrent::{ConcurrentStore, ItemRef};
