//! Command Boundary
//!
//! [`Store::execute`] is the single entry point the protocol layer calls. A
//! parsed request goes in, a response comes out; client mistakes and resource
//! exhaustion are response variants, never panics or `Err`s.
//!
//! | Request | Responses |
//! |---------|-----------|
//! | `Get` | `Found`, `NotFound` |
//! | `GetMulti` | `Values` |
//! | `Set` | `Stored` |
//! | `Add` | `Stored`, `NotStored` (key present) |
//! | `Replace` | `Stored`, `NotStored` (key absent) |
//! | `Cas` | `Stored`, `CasMismatch`, `NotFound` |
//! | `Delete` | `Deleted`, `NotFound` |
//! | `Incr` / `Decr` | `Numeric`, `NotFound` |
//! | `FlushAll` | `Ok` |
//! | `Stats` | `Stats` |
//!
//! Every storing request may also answer `Oversize`, `OutOfMemory` or
//! `ClientError`. In each of those cases the previous value, if any, is left
//! untouched.

use std::collections::BTreeMap;
use std::hash::BuildHasher;

use crate::error::{AllocError, ClientError};
use crate::item::{item_ntotal, validate_key, ItemId};
use crate::store::Store;
use crate::time::realtime;

/// Longest decimal rendering of a `u64`.
const U64_MAX_DIGITS: usize = 20;

/// Which statistics report to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatsKind {
    /// Engine-wide counters and gauges.
    #[default]
    General,
    /// Occupancy and counters per size class.
    Slabs,
    /// Item counts per size class.
    Items,
    /// Configuration echo.
    Settings,
}

/// A parsed client request.
///
/// Expiry times use the protocol encoding: 0 never expires, values up to 30
/// days are relative, larger values are absolute unix times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Fetch one key.
    Get {
        /// Key to fetch.
        key: &'a [u8],
    },
    /// Fetch several keys at once.
    GetMulti {
        /// Keys to fetch, in response order.
        keys: &'a [&'a [u8]],
    },
    /// Store unconditionally.
    Set {
        /// Key.
        key: &'a [u8],
        /// Value bytes.
        value: &'a [u8],
        /// Opaque client flags.
        flags: u32,
        /// Protocol expiry.
        exptime: u32,
    },
    /// Store only if the key is absent.
    Add {
        /// Key.
        key: &'a [u8],
        /// Value bytes.
        value: &'a [u8],
        /// Opaque client flags.
        flags: u32,
        /// Protocol expiry.
        exptime: u32,
    },
    /// Store only if the key is present.
    Replace {
        /// Key.
        key: &'a [u8],
        /// Value bytes.
        value: &'a [u8],
        /// Opaque client flags.
        flags: u32,
        /// Protocol expiry.
        exptime: u32,
    },
    /// Store only if the item still carries `cas`.
    Cas {
        /// Key.
        key: &'a [u8],
        /// Value bytes.
        value: &'a [u8],
        /// Opaque client flags.
        flags: u32,
        /// Protocol expiry.
        exptime: u32,
        /// Token from a previous fetch.
        cas: u64,
    },
    /// Remove a key.
    Delete {
        /// Key.
        key: &'a [u8],
    },
    /// Add to a decimal value, wrapping at 2^64.
    Incr {
        /// Key.
        key: &'a [u8],
        /// Amount to add.
        delta: u64,
    },
    /// Subtract from a decimal value, stopping at zero.
    Decr {
        /// Key.
        key: &'a [u8],
        /// Amount to subtract.
        delta: u64,
    },
    /// Remove every item.
    FlushAll,
    /// Produce a statistics report.
    Stats(StatsKind),
}

impl Request<'_> {
    /// Lowercase verb name.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::GetMulti { .. } => "gets",
            Request::Set { .. } => "set",
            Request::Add { .. } => "add",
            Request::Replace { .. } => "replace",
            Request::Cas { .. } => "cas",
            Request::Delete { .. } => "delete",
            Request::Incr { .. } => "incr",
            Request::Decr { .. } => "decr",
            Request::FlushAll => "flush_all",
            Request::Stats(_) => "stats",
        }
    }
}

/// An item copied out of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes.
    pub data: Vec<u8>,
    /// Opaque client flags.
    pub flags: u32,
    /// CAS token to pass back in a [`Request::Cas`].
    pub cas: u64,
}

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The item was stored.
    Stored,
    /// An `Add` or `Replace` precondition failed.
    NotStored,
    /// A single fetched item.
    Found(Value),
    /// One entry per requested key, `None` for misses.
    Values(Vec<Option<Value>>),
    /// The key is absent.
    NotFound,
    /// The item changed since the CAS token was issued.
    CasMismatch,
    /// The item was removed.
    Deleted,
    /// New value after `Incr` or `Decr`.
    Numeric(u64),
    /// The item is larger than the largest chunk.
    Oversize,
    /// No memory could be found for the item.
    OutOfMemory,
    /// Malformed request.
    ClientError(ClientError),
    /// A statistics report.
    Stats(BTreeMap<String, f64>),
    /// Acknowledgement with no payload.
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Set,
    Add,
    Replace,
    Cas(u64),
}

impl<S: BuildHasher> Store<S> {
    /// Executes one request.
    pub fn execute(&mut self, request: Request<'_>) -> Response {
        match request {
            Request::Get { key } => self.process_get(key),
            Request::GetMulti { keys } => self.process_get_multi(keys),
            Request::Set {
                key,
                value,
                flags,
                exptime,
            } => self.process_update(StoreMode::Set, key, value, flags, exptime),
            Request::Add {
                key,
                value,
                flags,
                exptime,
            } => self.process_update(StoreMode::Add, key, value, flags, exptime),
            Request::Replace {
                key,
                value,
                flags,
                exptime,
            } => self.process_update(StoreMode::Replace, key, value, flags, exptime),
            Request::Cas {
                key,
                value,
                flags,
                exptime,
                cas,
            } => self.process_update(StoreMode::Cas(cas), key, value, flags, exptime),
            Request::Delete { key } => self.process_delete(key),
            Request::Incr { key, delta } => self.process_arithmetic(key, delta, true),
            Request::Decr { key, delta } => self.process_arithmetic(key, delta, false),
            Request::FlushAll => {
                self.metrics.cmd_flush += 1;
                self.flush_all();
                Response::Ok
            }
            Request::Stats(kind) => Response::Stats(self.stats(kind)),
        }
    }

    /// Shorthand for [`Request::Set`].
    pub fn set(&mut self, key: &[u8], value: &[u8], flags: u32, exptime: u32) -> Response {
        self.execute(Request::Set {
            key,
            value,
            flags,
            exptime,
        })
    }

    /// Shorthand for [`Request::Delete`].
    pub fn delete(&mut self, key: &[u8]) -> Response {
        self.execute(Request::Delete { key })
    }

    fn copy_value(&self, id: ItemId) -> Value {
        let item = self.item(id);
        Value {
            key: item.key.to_vec(),
            data: item.value.to_vec(),
            flags: item.flags,
            cas: item.cas,
        }
    }

    fn process_get(&mut self, key: &[u8]) -> Response {
        if let Err(err) = validate_key(key) {
            return Response::ClientError(err);
        }
        match self.get(key) {
            Some(id) => Response::Found(self.copy_value(id)),
            None => Response::NotFound,
        }
    }

    fn process_get_multi(&mut self, keys: &[&[u8]]) -> Response {
        // a bad key rejects the whole request before any lookup is counted
        for key in keys {
            if let Err(err) = validate_key(key) {
                return Response::ClientError(err);
            }
        }

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.get(key).map(|id| self.copy_value(id));
            values.push(value);
        }
        Response::Values(values)
    }

    fn process_update(
        &mut self,
        mode: StoreMode,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Response {
        if let Err(err) = validate_key(key) {
            return Response::ClientError(err);
        }
        if mode == StoreMode::Cas(0) {
            return Response::ClientError(ClientError::InvalidCas);
        }
        self.metrics.cmd_set += 1;

        if self
            .class_for(item_ntotal(key.len(), value.len(), flags))
            .is_err()
        {
            self.metrics.oversize += 1;
            return Response::Oversize;
        }

        let exptime = realtime(exptime, self.now());
        let existing = self.find_live(key);

        match (mode, existing) {
            (StoreMode::Add, Some(id)) => {
                // a failed add still counts as a use of the item
                self.update(id);
                return Response::NotStored;
            }
            (StoreMode::Replace, None) => return Response::NotStored,
            (StoreMode::Cas(_), None) => {
                self.metrics.cas_misses += 1;
                return Response::NotFound;
            }
            (StoreMode::Cas(token), Some(id)) if self.item(id).cas != token => {
                self.metrics.cas_badval += 1;
                return Response::CasMismatch;
            }
            _ => {}
        }

        match self.write_item(key, value, flags, exptime, existing) {
            Ok(_) => {
                if let StoreMode::Cas(_) = mode {
                    self.metrics.cas_hits += 1;
                }
                Response::Stored
            }
            Err(err) => self.alloc_failure(err),
        }
    }

    fn alloc_failure(&mut self, err: AllocError) -> Response {
        match err {
            AllocError::Oversize { .. } => {
                self.metrics.oversize += 1;
                Response::Oversize
            }
            AllocError::OutOfMemory { .. } => {
                self.metrics.out_of_memory += 1;
                Response::OutOfMemory
            }
        }
    }

    fn process_delete(&mut self, key: &[u8]) -> Response {
        if let Err(err) = validate_key(key) {
            return Response::ClientError(err);
        }
        match self.find_live(key) {
            Some(id) => {
                self.unlink(id);
                self.metrics.delete_hits += 1;
                Response::Deleted
            }
            None => {
                self.metrics.delete_misses += 1;
                Response::NotFound
            }
        }
    }

    fn process_arithmetic(&mut self, key: &[u8], delta: u64, incr: bool) -> Response {
        if let Err(err) = validate_key(key) {
            return Response::ClientError(err);
        }

        let Some(id) = self.find_live(key) else {
            if incr {
                self.metrics.incr_misses += 1;
            } else {
                self.metrics.decr_misses += 1;
            }
            return Response::NotFound;
        };

        let item = self.item(id);
        let Some(current) = parse_decimal(item.value) else {
            return Response::ClientError(ClientError::NonNumeric);
        };
        let (flags, exptime) = (item.flags, item.exptime);

        let result = if incr {
            self.metrics.incr_hits += 1;
            current.wrapping_add(delta)
        } else {
            self.metrics.decr_hits += 1;
            current.saturating_sub(delta)
        };

        let digits = result.to_string();
        match self.write_item(key, digits.as_bytes(), flags, exptime, Some(id)) {
            Ok(_) => Response::Numeric(result),
            Err(err) => self.alloc_failure(err),
        }
    }

    /// Builds a statistics report.
    pub fn stats(&self, kind: StatsKind) -> BTreeMap<String, f64> {
        match kind {
            StatsKind::General => self.general_stats(),
            StatsKind::Slabs => self.slab_stats(),
            StatsKind::Items => self.item_stats(),
            StatsKind::Settings => self.settings_stats(),
        }
    }

    fn general_stats(&self) -> BTreeMap<String, f64> {
        let mut stats = self.metrics.to_btreemap();
        stats.insert("bytes_used".to_string(), self.slabs.bytes_used() as f64);
        stats.insert("limit_maxbytes".to_string(), self.slabs.max_bytes() as f64);
        stats.insert("total_slabs".to_string(), self.slabs.slab_count() as f64);
        stats.insert("hash_power_level".to_string(), f64::from(self.table.power()));
        stats.insert("hash_buckets".to_string(), self.table.buckets() as f64);
        stats.insert(
            "hash_expansions".to_string(),
            self.table.expansions() as f64,
        );
        stats
    }

    fn slab_stats(&self) -> BTreeMap<String, f64> {
        let mut stats = BTreeMap::new();
        let mut active = 0usize;
        for (id, _) in self.slabs.size_classes().iter() {
            let (Some(info), Some(metrics)) =
                (self.slabs.class_info(id), self.slabs.class_metrics(id))
            else {
                continue;
            };
            if info.slabs > 0 {
                active += 1;
            }
            let prefix = format!("slab.{id:03}");
            stats.insert(format!("{prefix}.chunk_size"), info.chunk_size as f64);
            stats.insert(
                format!("{prefix}.chunks_per_slab"),
                info.chunks_per_slab as f64,
            );
            stats.insert(format!("{prefix}.total_slabs"), info.slabs as f64);
            stats.insert(format!("{prefix}.total_chunks"), info.total_chunks() as f64);
            stats.insert(format!("{prefix}.used_chunks"), info.used_chunks() as f64);
            stats.insert(format!("{prefix}.free_chunks"), info.free_chunks as f64);
            metrics.extend_btreemap(&prefix, &mut stats);
        }
        stats.insert("active_slabs".to_string(), active as f64);
        stats.insert(
            "total_malloced".to_string(),
            self.slabs.bytes_used() as f64,
        );
        stats
    }

    fn item_stats(&self) -> BTreeMap<String, f64> {
        let mut stats = BTreeMap::new();
        for (id, _) in self.slabs.size_classes().iter() {
            let (Some(info), Some(metrics)) =
                (self.slabs.class_info(id), self.slabs.class_metrics(id))
            else {
                continue;
            };
            if info.slabs == 0 && metrics.evictions == 0 && metrics.reclaimed == 0 {
                continue;
            }
            let prefix = format!("items.{id:03}");
            stats.insert(format!("{prefix}.number"), info.linked_items as f64);
            stats.insert(format!("{prefix}.evicted"), metrics.evictions as f64);
            stats.insert(format!("{prefix}.reclaimed"), metrics.reclaimed as f64);
        }
        stats
    }

    fn settings_stats(&self) -> BTreeMap<String, f64> {
        let config = &self.config;
        let mut stats = BTreeMap::new();
        stats.insert("factor".to_string(), config.factor);
        stats.insert("chunk_size".to_string(), config.chunk_size as f64);
        stats.insert("max_chunk_size".to_string(), config.max_chunk_size as f64);
        stats.insert("slab_size".to_string(), config.slab_size as f64);
        stats.insert("maxbytes".to_string(), config.max_bytes as f64);
        stats.insert("hash_power".to_string(), f64::from(config.hash_power));
        stats.insert(
            "eviction_policy".to_string(),
            f64::from(config.eviction.code()),
        );
        stats.insert(
            "num_classes".to_string(),
            self.slabs.size_classes().len() as f64,
        );
        stats.insert("port".to_string(), f64::from(config.network.port));
        stats.insert("maxconns".to_string(), f64::from(config.network.max_conns));
        stats.insert("backlog".to_string(), f64::from(config.network.backlog));
        stats.insert(
            "reqs_per_event".to_string(),
            f64::from(config.network.reqs_per_event),
        );
        stats
    }
}

/// Parses an unsigned decimal the way INCR and DECR expect it.
fn parse_decimal(value: &[u8]) -> Option<u64> {
    if value.is_empty()
        || value.len() > U64_MAX_DIGITS
        || !value.iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    std::str::from_utf8(value).ok()?.parse().ok()
}
