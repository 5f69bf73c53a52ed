// Data models for trace-replay simulation

use serde::Serialize;
use slabcache::EvictionPolicy;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What a trace line asks the cache to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceOp {
    /// GET, then SET on a miss (the default when a line has no op column)
    #[default]
    Lookaside,
    /// Plain GET
    Get,
    /// Unconditional SET
    Set,
    /// DELETE
    Delete,
}

impl FromStr for TraceOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "lookaside" => Ok(TraceOp::Lookaside),
            "get" => Ok(TraceOp::Get),
            "set" => Ok(TraceOp::Set),
            "delete" | "del" => Ok(TraceOp::Delete),
            other => Err(format!("unknown op '{other}'")),
        }
    }
}

/// A single request read from a trace
#[derive(Debug, Clone)]
pub struct Request {
    /// Unix timestamp of the request in seconds
    pub timestamp: u32,
    /// Cache key
    pub key: String,
    /// Size of the value in bytes
    pub size: usize,
    /// Time-to-live in seconds (0 means no TTL)
    pub ttl: u32,
    /// Operation to replay
    pub op: TraceOp,
}

impl Request {
    /// Create a new lookaside request
    pub fn new(timestamp: u32, key: String, size: usize, ttl: u32) -> Self {
        Self {
            timestamp,
            key,
            size,
            ttl,
            op: TraceOp::Lookaside,
        }
    }
}

/// A cache a trace is replayed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Backend {
    /// The slab engine under one eviction policy
    Engine(EvictionPolicy),
    /// Moka cache (external crate for comparison)
    Moka,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Engine(policy) => policy.as_str(),
            Backend::Moka => "moka",
        }
    }

    /// Every engine policy plus the baseline
    pub fn all() -> Vec<Backend> {
        EvictionPolicy::all()
            .iter()
            .map(|&policy| Backend::Engine(policy))
            .chain(std::iter::once(Backend::Moka))
            .collect()
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "moka" => Ok(Backend::Moka),
            other => other.parse::<EvictionPolicy>().map(Backend::Engine),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Directory containing input log files
    pub input_dir: PathBuf,
    /// Memory budget handed to every backend
    pub max_bytes: usize,
    /// Slab size for the engine
    pub slab_size: usize,
    /// Size-class growth factor for the engine
    pub factor: f64,
    /// Backends to simulate
    pub backends: Vec<Backend>,
    /// Worker threads sharing one engine (1 = sequential replay)
    pub thread_count: usize,
    /// Seed for the random-slab policy
    pub seed: Option<u64>,
}

/// Results of a simulation run
#[derive(Debug)]
pub struct SimulationResult {
    /// Statistics for each backend
    pub stats: HashMap<Backend, BackendStats>,
    /// Total number of requests replayed
    pub total_requests: usize,
    /// Total bytes requested
    pub total_bytes: usize,
    /// Number of unique keys in the trace
    pub unique_objects: usize,
    /// Duration of the simulation
    pub duration: Duration,
}

/// Statistics for a single backend
#[derive(Debug, Default, Clone)]
pub struct BackendStats {
    /// Number of cache hits
    pub hits: usize,
    /// Number of cache misses
    pub misses: usize,
    /// Bytes served from cache (hits)
    pub bytes_hit: usize,
    /// Bytes served from backend (misses)
    pub bytes_miss: usize,
    /// Store requests issued
    pub sets: usize,
    /// Store requests refused for lack of memory
    pub out_of_memory: usize,
    /// Store requests refused for exceeding the largest chunk
    pub oversize: usize,
    /// Live items evicted
    pub evictions: u64,
    /// Slabs reassigned between classes
    pub slab_evictions: u64,
    /// Expired items reused by the allocator
    pub reclaimed: u64,
    /// Expired items found by lookups
    pub expired: u64,
    /// Bytes in use when the replay finished
    pub bytes_used: usize,
    /// Items cached when the replay finished
    pub items: usize,
    /// Simulation time in milliseconds (includes I/O)
    pub simulation_time_ms: u64,
    /// Latency statistics for cache operations (excludes I/O)
    pub latency: LatencyStats,
}

impl BackendStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Calculate byte hit rate as percentage
    pub fn byte_hit_rate(&self) -> f64 {
        let total = self.bytes_hit + self.bytes_miss;
        if total > 0 {
            (self.bytes_hit as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Folds another worker's counters into this one
    pub fn merge(&mut self, other: &BackendStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.bytes_hit += other.bytes_hit;
        self.bytes_miss += other.bytes_miss;
        self.sets += other.sets;
        self.out_of_memory += other.out_of_memory;
        self.oversize += other.oversize;
    }
}

/// Latency statistics for a single operation type
#[derive(Debug, Clone, Default)]
pub struct OpLatencyStats {
    /// Total time spent (nanoseconds)
    pub total_ns: u64,
    /// Number of operations
    pub count: u64,
    /// Minimum latency (nanoseconds)
    pub min_ns: u64,
    /// Maximum latency (nanoseconds)
    pub max_ns: u64,
    /// Latency percentiles
    pub percentiles: Option<LatencyPercentiles>,
}

impl OpLatencyStats {
    /// Calculate average latency in nanoseconds
    pub fn avg_ns(&self) -> f64 {
        if self.count > 0 {
            self.total_ns as f64 / self.count as f64
        } else {
            0.0
        }
    }

    /// Calculate throughput in operations per second
    pub fn ops_per_sec(&self) -> f64 {
        if self.total_ns > 0 {
            (self.count as f64 * 1_000_000_000.0) / self.total_ns as f64
        } else {
            0.0
        }
    }

    /// Get total duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.total_ns as f64 / 1_000_000_000.0
    }

    fn p50(&self) -> u64 {
        self.percentiles.as_ref().map(|p| p.p50_ns).unwrap_or(0)
    }

    fn p99(&self) -> u64 {
        self.percentiles.as_ref().map(|p| p.p99_ns).unwrap_or(0)
    }
}

/// Latency statistics for all cache operations
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    /// Total time spent in all cache operations (nanoseconds)
    pub total_ns: u64,
    /// Total number of operations
    pub count: u64,
    /// Get operation stats
    pub get_stats: OpLatencyStats,
    /// Set operation stats
    pub set_stats: OpLatencyStats,
    /// Delete operation stats
    pub delete_stats: OpLatencyStats,
}

/// Latency percentiles
#[derive(Debug, Clone, Default)]
pub struct LatencyPercentiles {
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
}

impl LatencyStats {
    /// Calculate average latency in nanoseconds (across all operations)
    pub fn avg_ns(&self) -> f64 {
        if self.count > 0 {
            self.total_ns as f64 / self.count as f64
        } else {
            0.0
        }
    }

    /// Calculate throughput in operations per second (all operations)
    pub fn ops_per_sec(&self) -> f64 {
        if self.total_ns > 0 {
            (self.count as f64 * 1_000_000_000.0) / self.total_ns as f64
        } else {
            0.0
        }
    }

    /// Get total duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.total_ns as f64 / 1_000_000_000.0
    }
}

/// CSV export row for simulation results
#[derive(Debug, Serialize)]
pub struct CsvResultRow {
    pub backend: String,
    pub hits: usize,
    pub misses: usize,
    pub hit_rate: f64,
    pub byte_hit_rate: f64,
    pub bytes_hit: usize,
    pub bytes_miss: usize,
    pub sets: usize,
    pub out_of_memory: usize,
    pub oversize: usize,
    pub evictions: u64,
    pub slab_evictions: u64,
    pub reclaimed: u64,
    pub expired: u64,
    pub bytes_used: usize,
    pub items: usize,
    pub simulation_time_ms: u64,
    // Combined stats
    pub total_ops: u64,
    pub ops_per_sec: f64,
    pub avg_latency_ns: f64,
    // Per-operation stats
    pub get_ops: u64,
    pub get_avg_ns: f64,
    pub get_p50_ns: u64,
    pub get_p99_ns: u64,
    pub set_ops: u64,
    pub set_avg_ns: f64,
    pub set_p50_ns: u64,
    pub set_p99_ns: u64,
    pub delete_ops: u64,
    pub delete_avg_ns: f64,
    pub delete_p50_ns: u64,
    pub delete_p99_ns: u64,
}

impl CsvResultRow {
    pub fn new(backend: Backend, stats: &BackendStats) -> Self {
        let latency = &stats.latency;
        Self {
            backend: backend.as_str().to_string(),
            hits: stats.hits,
            misses: stats.misses,
            hit_rate: stats.hit_rate(),
            byte_hit_rate: stats.byte_hit_rate(),
            bytes_hit: stats.bytes_hit,
            bytes_miss: stats.bytes_miss,
            sets: stats.sets,
            out_of_memory: stats.out_of_memory,
            oversize: stats.oversize,
            evictions: stats.evictions,
            slab_evictions: stats.slab_evictions,
            reclaimed: stats.reclaimed,
            expired: stats.expired,
            bytes_used: stats.bytes_used,
            items: stats.items,
            simulation_time_ms: stats.simulation_time_ms,
            total_ops: latency.count,
            ops_per_sec: latency.ops_per_sec(),
            avg_latency_ns: latency.avg_ns(),
            get_ops: latency.get_stats.count,
            get_avg_ns: latency.get_stats.avg_ns(),
            get_p50_ns: latency.get_stats.p50(),
            get_p99_ns: latency.get_stats.p99(),
            set_ops: latency.set_stats.count,
            set_avg_ns: latency.set_stats.avg_ns(),
            set_p50_ns: latency.set_stats.p50(),
            set_p99_ns: latency.set_stats.p99(),
            delete_ops: latency.delete_stats.count,
            delete_avg_ns: latency.delete_stats.avg_ns(),
            delete_p50_ns: latency.delete_stats.p50(),
            delete_p99_ns: latency.delete_stats.p99(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("moka".parse::<Backend>(), Ok(Backend::Moka));
        assert_eq!(
            "LRU".parse::<Backend>(),
            Ok(Backend::Engine(EvictionPolicy::Lru))
        );
        assert_eq!(
            "lra".parse::<Backend>(),
            Ok(Backend::Engine(EvictionPolicy::LeastRecentlyAccessedSlab))
        );
        assert!("gdsf".parse::<Backend>().is_err());
    }

    #[test]
    fn test_all_backends_end_with_baseline() {
        let all = Backend::all();
        assert_eq!(all.len(), EvictionPolicy::all().len() + 1);
        assert_eq!(all.last(), Some(&Backend::Moka));
    }

    #[test]
    fn test_trace_op_parse() {
        assert_eq!("".parse::<TraceOp>(), Ok(TraceOp::Lookaside));
        assert_eq!("GET".parse::<TraceOp>(), Ok(TraceOp::Get));
        assert_eq!("set".parse::<TraceOp>(), Ok(TraceOp::Set));
        assert_eq!("del".parse::<TraceOp>(), Ok(TraceOp::Delete));
        assert!("touch".parse::<TraceOp>().is_err());
    }

    #[test]
    fn test_rates() {
        let stats = BackendStats {
            hits: 3,
            misses: 1,
            bytes_hit: 100,
            bytes_miss: 300,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(stats.byte_hit_rate(), 25.0);
        assert_eq!(BackendStats::new().hit_rate(), 0.0);
    }
}
