// Statistics collection and reporting for trace replay

use crate::models::{Backend, BackendStats, CsvResultRow, SimulationResult};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Collects and reports statistics from simulation runs
#[derive(Debug)]
pub struct SimulationStats {
    /// Stats for each backend
    stats: HashMap<Backend, BackendStats>,
    /// Backends in the order they were requested
    backends: Vec<Backend>,
}

impl SimulationStats {
    /// Create a new statistics collector for the given backends
    pub fn new(backends: &[Backend]) -> Self {
        Self {
            stats: backends.iter().map(|&b| (b, BackendStats::new())).collect(),
            backends: backends.to_vec(),
        }
    }

    /// Store the finished statistics of one backend
    pub fn record(&mut self, backend: Backend, stats: BackendStats) {
        if !self.backends.contains(&backend) {
            self.backends.push(backend);
        }
        self.stats.insert(backend, stats);
    }

    /// Get the current result
    pub fn result(
        &self,
        duration: Duration,
        total_requests: usize,
        total_bytes: usize,
        unique_objects: usize,
    ) -> SimulationResult {
        SimulationResult {
            stats: self.stats.clone(),
            total_requests,
            total_bytes,
            unique_objects,
            duration,
        }
    }

    /// Print a summary table of the simulation results
    pub fn print_summary(&self) {
        println!("\nResults");
        println!("┌──────────┬──────────┬──────────┬────────────┬────────────┬──────────┬────────────┐");
        println!(
            "│ {:<8} │ {:>8} │ {:>8} │ {:>10} │ {:>10} │ {:>8} │ {:>10} │",
            "Backend", "Hit %", "Byte %", "Evictions", "Slab evict", "OOM", "Used MB"
        );
        println!("├──────────┼──────────┼──────────┼────────────┼────────────┼──────────┼────────────┤");

        for backend in &self.backends {
            match self.stats.get(backend) {
                Some(stats) => println!(
                    "│ {:<8} │ {:>8.2} │ {:>8.2} │ {:>10} │ {:>10} │ {:>8} │ {:>10.2} │",
                    backend.as_str(),
                    stats.hit_rate(),
                    stats.byte_hit_rate(),
                    stats.evictions,
                    stats.slab_evictions,
                    stats.out_of_memory,
                    stats.bytes_used as f64 / (1024.0 * 1024.0)
                ),
                None => println!(
                    "│ {:<8} │ {:>8} │ {:>8} │ {:>10} │ {:>10} │ {:>8} │ {:>10} │",
                    backend.as_str(),
                    "N/A",
                    "N/A",
                    "N/A",
                    "N/A",
                    "N/A",
                    "N/A"
                ),
            }
        }

        println!("└──────────┴──────────┴──────────┴────────────┴────────────┴──────────┴────────────┘");

        if let Some((best, stats)) = self
            .backends
            .iter()
            .filter_map(|b| self.stats.get(b).map(|s| (b, s)))
            .max_by(|a, b| a.1.hit_rate().total_cmp(&b.1.hit_rate()))
        {
            println!("Best hit rate: {best} ({:.2}%)", stats.hit_rate());
        }
    }

    /// Create SimulationStats from a SimulationResult (for CSV export after run)
    pub fn from_result(result: &SimulationResult) -> Self {
        let mut backends: Vec<Backend> = result.stats.keys().copied().collect();
        backends.sort();

        Self {
            stats: result.stats.clone(),
            backends,
        }
    }

    /// Export results to a CSV file
    pub fn export_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;

        for backend in &self.backends {
            if let Some(stats) = self.stats.get(backend) {
                writer.serialize(CsvResultRow::new(*backend, stats))?;
            }
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slabcache::EvictionPolicy;

    #[test]
    fn test_export_csv_one_row_per_backend() {
        let lru = Backend::Engine(EvictionPolicy::Lru);
        let mut stats = SimulationStats::new(&[lru, Backend::Moka]);
        stats.record(
            lru,
            BackendStats {
                hits: 9,
                misses: 1,
                evictions: 4,
                ..Default::default()
            },
        );

        let path = std::env::temp_dir().join(format!(
            "slabcache_sim_stats_{}.csv",
            std::process::id()
        ));
        let result = stats.result(Duration::from_millis(5), 10, 1000, 3);
        SimulationStats::from_result(&result)
            .export_csv(&path)
            .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "backend");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);

        let hit_rate = headers.iter().position(|h| h == "hit_rate").unwrap();
        let lru_row = rows.iter().find(|r| &r[0] == "lru").unwrap();
        assert_eq!(lru_row[hit_rate].parse::<f64>().unwrap(), 90.0);
        let evictions = headers.iter().position(|h| h == "evictions").unwrap();
        assert_eq!(&lru_row[evictions], "4");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_record_keeps_request_order() {
        let backends = [Backend::Moka, Backend::Engine(EvictionPolicy::None)];
        let mut stats = SimulationStats::new(&backends);
        stats.record(Backend::Engine(EvictionPolicy::Lru), BackendStats::new());
        assert_eq!(
            stats.backends,
            vec![
                Backend::Moka,
                Backend::Engine(EvictionPolicy::None),
                Backend::Engine(EvictionPolicy::Lru)
            ]
        );
    }
}
