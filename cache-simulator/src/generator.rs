//! Synthetic traffic log generation
//!
//! Writes one CSV file per simulated hour in the `timestamp,key,size,ttl[,op]`
//! format the replay reads. A configurable share of traffic goes to a small
//! popular key set with a Zipf-like skew, and the popular set drifts from hour
//! to hour. Each key has a fixed size and TTL derived from its id, so repeated
//! requests for a key look like the same object.
//!
//! Hours are generated on separate threads. Every hour seeds its own
//! [`SmallRng`] from the configured seed, so a seeded run is reproducible.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info};

/// Settings for a generated trace
#[derive(Debug, Clone)]
pub struct TrafficLogConfig {
    /// Requests per second
    pub rps: u32,
    /// Total duration in hours
    pub duration_hours: u32,
    /// Number of unique keys
    pub unique_objects: u32,
    /// Percentage of traffic going to popular keys
    pub popular_traffic_percent: u8,
    /// Percentage of keys considered popular
    pub popular_objects_percent: u8,
    /// Minimum value size in bytes
    pub min_size: u64,
    /// Maximum value size in bytes
    pub max_size: u64,
    /// Minimum TTL in seconds
    pub min_ttl: u64,
    /// Maximum TTL in seconds
    pub max_ttl: u64,
    /// Percentage of keys stored without a TTL
    pub no_ttl_percent: u8,
    /// Percentage of requests written as explicit deletes
    pub delete_percent: u8,
    /// Output directory
    pub output_dir: PathBuf,
    /// Write buffer size in KB
    pub buffer_size_kb: u32,
    /// Unix time of the first request (`None` = now)
    pub start_time: Option<u64>,
    /// RNG seed (`None` = from the OS)
    pub seed: Option<u64>,
}

impl Default for TrafficLogConfig {
    fn default() -> Self {
        Self {
            rps: 100,
            duration_hours: 24,
            unique_objects: 10_000,
            popular_traffic_percent: 80,
            popular_objects_percent: 20,
            min_size: 64,
            max_size: 64 * 1024,
            min_ttl: 60,
            max_ttl: 3600,
            no_ttl_percent: 50,
            delete_percent: 0,
            output_dir: PathBuf::from("traffic_logs"),
            buffer_size_kb: 8192,
            start_time: None,
            seed: None,
        }
    }
}

/// Generator for synthetic traffic logs
#[derive(Debug)]
pub struct TrafficLogGenerator {
    config: TrafficLogConfig,
}

impl TrafficLogGenerator {
    /// Create a new generator with the given configuration
    pub fn new(config: TrafficLogConfig) -> Self {
        Self { config }
    }

    /// Writes every hourly file, one thread per hour.
    pub fn generate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config = &self.config;
        if config.unique_objects == 0 {
            return Err("unique_objects must be positive".into());
        }
        if config.min_size > config.max_size || config.min_ttl > config.max_ttl {
            return Err("size and ttl ranges must have min <= max".into());
        }

        fs::create_dir_all(&config.output_dir)?;

        let start_time = match config.start_time {
            Some(start) => start,
            None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs(),
        };
        let seed = match config.seed {
            Some(seed) => seed,
            None => rand::random(),
        };
        let total = u64::from(config.rps) * 3600 * u64::from(config.duration_hours);

        println!("Generating traffic logs:");
        println!("  Requests per second: {}", config.rps);
        println!("  Duration: {} hours", config.duration_hours);
        println!("  Unique keys: {}", config.unique_objects);
        println!(
            "  Traffic distribution: {}% from {}% of keys",
            config.popular_traffic_percent, config.popular_objects_percent
        );
        println!(
            "  Size range: {} - {} bytes",
            config.min_size, config.max_size
        );
        println!(
            "  TTL range: {} - {} seconds ({}% without TTL)",
            config.min_ttl, config.max_ttl, config.no_ttl_percent
        );
        println!("  Output directory: {}", config.output_dir.display());
        println!("  Total requests: {total}");

        let completed = AtomicU64::new(0);
        let mut failed = false;

        thread::scope(|scope| {
            let handles: Vec<_> = (0..config.duration_hours)
                .map(|hour| {
                    let completed = &completed;
                    scope.spawn(move || {
                        let hour_start = start_time + u64::from(hour) * 3600;
                        let written = Self::generate_hour(
                            config,
                            hour,
                            hour_start,
                            seed.wrapping_add(u64::from(hour)),
                        )?;
                        let done = completed.fetch_add(written, Ordering::Relaxed) + written;
                        info!(hour, done, total, "hour complete");
                        Ok::<(), std::io::Error>(())
                    })
                })
                .collect();

            for (hour, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(hour, error = %e, "failed to generate hour");
                        failed = true;
                    }
                    Err(_) => {
                        error!(hour, "generator thread panicked");
                        failed = true;
                    }
                }
            }
        });

        if failed {
            return Err("traffic generation failed".into());
        }
        println!("Traffic log generation complete");
        Ok(())
    }

    /// Path of the file holding `hour`
    pub fn hour_file(output_dir: &Path, hour: u32) -> PathBuf {
        output_dir.join(format!("traffic_hour_{hour:02}.csv"))
    }

    /// Writes one hour of traffic and returns the number of requests written.
    fn generate_hour(
        config: &TrafficLogConfig,
        hour: u32,
        start_time: u64,
        seed: u64,
    ) -> std::io::Result<u64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let file = File::create(Self::hour_file(&config.output_dir, hour))?;
        let mut writer =
            BufWriter::with_capacity(config.buffer_size_kb.max(1) as usize * 1024, file);

        writeln!(writer, "timestamp,key,size,ttl,op")?;

        let popular = (u64::from(config.unique_objects)
            * u64::from(config.popular_objects_percent)
            / 100)
            .max(1) as u32;
        let popular = popular.min(config.unique_objects);
        let regular = config.unique_objects - popular;

        // Popular keys drift through the key space hour by hour
        let shift = (hour % 12) * (popular / 12).max(1);

        let requests = u64::from(config.rps) * 3600;
        for n in 0..requests {
            let timestamp = start_time + n / u64::from(config.rps.max(1));

            let id = if regular == 0 || rng.gen_range(0..100u8) < config.popular_traffic_percent
            {
                // Zipf-like skew: squaring a uniform draw favours low ranks
                let u: f64 = rng.gen();
                let rank = ((u * u) * f64::from(popular)) as u32;
                (shift + rank.min(popular - 1)) % popular
            } else {
                popular + rng.gen_range(0..regular)
            };

            let (size, ttl) = Self::object_shape(config, id);
            let op = if rng.gen_range(0..100u8) < config.delete_percent {
                "delete"
            } else {
                ""
            };

            writeln!(writer, "{timestamp},key_{id},{size},{ttl},{op}")?;
        }

        writer.flush()?;
        Ok(requests)
    }

    /// Fixed size and TTL of a key, so a key always describes one object.
    fn object_shape(config: &TrafficLogConfig, id: u32) -> (u64, u64) {
        let mut rng = SmallRng::seed_from_u64(u64::from(id));
        let size = rng.gen_range(config.min_size..=config.max_size);
        let ttl = if rng.gen_range(0..100u8) < config.no_ttl_percent {
            0
        } else {
            rng.gen_range(config.min_ttl..=config.max_ttl)
        };
        (size, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::LogReader;
    use crate::models::TraceOp;
    use std::collections::HashMap;

    fn create_temp_dir(test_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "slabcache_generator_{test_name}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("Failed to create temp directory");
        dir
    }

    fn small_config(output_dir: PathBuf) -> TrafficLogConfig {
        TrafficLogConfig {
            rps: 2,
            duration_hours: 2,
            unique_objects: 500,
            output_dir,
            start_time: Some(1_700_000_000),
            seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_generates_readable_hourly_files() {
        let dir = create_temp_dir("hourly");
        TrafficLogGenerator::new(small_config(dir.clone()))
            .generate()
            .expect("Generation failed");

        for hour in 0..2 {
            assert!(TrafficLogGenerator::hour_file(&dir, hour).exists());
        }

        let requests: Vec<_> = LogReader::new(&dir)
            .stream_requests()
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(requests.len(), 2 * 2 * 3600);

        // timestamps never go backwards across the hour boundary
        assert!(requests.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(requests[0].timestamp, 1_700_000_000);

        for request in &requests {
            assert!((64..=64 * 1024).contains(&request.size));
            assert!(request.ttl == 0 || (60..=3600).contains(&request.ttl));
            assert_eq!(request.op, TraceOp::Lookaside);
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_keys_keep_their_shape() {
        let dir = create_temp_dir("shape");
        TrafficLogGenerator::new(small_config(dir.clone()))
            .generate()
            .unwrap();

        let mut shapes: HashMap<String, (usize, u32)> = HashMap::new();
        for request in LogReader::new(&dir).stream_requests().unwrap() {
            let request = request.unwrap();
            let shape = shapes
                .entry(request.key.clone())
                .or_insert((request.size, request.ttl));
            assert_eq!(*shape, (request.size, request.ttl), "{}", request.key);
        }
        assert!(shapes.len() <= 500);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_popular_keys_dominate() {
        let dir = create_temp_dir("popular");
        TrafficLogGenerator::new(small_config(dir.clone()))
            .generate()
            .unwrap();

        // 20% of 500 keys are popular: ids 0..100
        let mut popular = 0usize;
        let mut total = 0usize;
        for request in LogReader::new(&dir).stream_requests().unwrap() {
            let request = request.unwrap();
            let id: u32 = request.key.trim_start_matches("key_").parse().unwrap();
            if id < 100 {
                popular += 1;
            }
            total += 1;
        }
        let share = popular as f64 / total as f64;
        assert!((0.75..0.85).contains(&share), "popular share {share}");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_same_seed_same_trace() {
        let a = create_temp_dir("seed_a");
        let b = create_temp_dir("seed_b");
        TrafficLogGenerator::new(small_config(a.clone()))
            .generate()
            .unwrap();
        TrafficLogGenerator::new(small_config(b.clone()))
            .generate()
            .unwrap();

        for hour in 0..2 {
            let left = fs::read(TrafficLogGenerator::hour_file(&a, hour)).unwrap();
            let right = fs::read(TrafficLogGenerator::hour_file(&b, hour)).unwrap();
            assert_eq!(left, right);
        }

        let _ = fs::remove_dir_all(&a);
        let _ = fs::remove_dir_all(&b);
    }

    #[test]
    fn test_delete_percent_emits_deletes() {
        let dir = create_temp_dir("deletes");
        let config = TrafficLogConfig {
            duration_hours: 1,
            delete_percent: 10,
            ..small_config(dir.clone())
        };
        TrafficLogGenerator::new(config).generate().unwrap();

        let deletes = LogReader::new(&dir)
            .stream_requests()
            .unwrap()
            .filter(|r| r.as_ref().unwrap().op == TraceOp::Delete)
            .count();
        assert!(deletes > 400 && deletes < 1100, "deletes {deletes}");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rejects_empty_key_space() {
        let dir = create_temp_dir("empty");
        let config = TrafficLogConfig {
            unique_objects: 0,
            ..small_config(dir.clone())
        };
        assert!(TrafficLogGenerator::new(config).generate().is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
