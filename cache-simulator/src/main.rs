use clap::{Parser, Subcommand};
use slabcache_simulator::generator::{TrafficLogConfig, TrafficLogGenerator};
use slabcache_simulator::models::{Backend, SimulationConfig};
use slabcache_simulator::runner::SimulationRunner;
use slabcache_simulator::stats::SimulationStats;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Trace-replay simulator for slabcache eviction policies
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay request logs against the engine and a moka baseline
    Simulate {
        /// Directory containing log files
        #[arg(short, long, value_name = "DIR")]
        input_dir: PathBuf,

        /// Memory budget in bytes for every backend
        /// Example: 67108864 for 64MB, 1073741824 for 1GB
        #[arg(long, default_value = "67108864")]
        max_bytes: usize,

        /// Slab size in bytes (also the largest chunk)
        #[arg(long, default_value = "1048576")]
        slab_size: usize,

        /// Size-class growth factor
        #[arg(long, default_value = "1.25")]
        factor: f64,

        /// Backends to simulate (none, lru, random, lra, lrc, moka)
        /// If not provided, all backends will be used
        #[arg(short, long, value_name = "BACKENDS", num_args = 1.., value_delimiter = ',')]
        backends: Option<Vec<String>>,

        /// Worker threads sharing one engine (default: 1, sequential replay)
        #[arg(long, default_value = "1")]
        threads: usize,

        /// Seed for the random slab policy
        #[arg(long)]
        seed: Option<u64>,

        /// Export results to CSV file
        #[arg(long, value_name = "PATH")]
        output_csv: Option<PathBuf>,
    },

    /// Generate synthetic traffic logs
    Generate {
        /// Requests per second
        #[arg(long, default_value = "100")]
        rps: u32,

        /// Duration in hours
        #[arg(long, default_value = "24")]
        duration: u32,

        /// Number of unique keys
        #[arg(long, default_value = "10000")]
        objects: u32,

        /// Percentage of traffic from popular keys (default: 80%)
        #[arg(long, default_value = "80")]
        popular_traffic: u8,

        /// Percentage of keys that are popular (default: 20%)
        #[arg(long, default_value = "20")]
        popular_objects: u8,

        /// Minimum value size in bytes
        #[arg(long, default_value = "64")]
        min_size: u64,

        /// Maximum value size in bytes
        #[arg(long, default_value = "65536")]
        max_size: u64,

        /// Minimum TTL in seconds
        #[arg(long, default_value = "60")]
        min_ttl: u64,

        /// Maximum TTL in seconds
        #[arg(long, default_value = "3600")]
        max_ttl: u64,

        /// Percentage of keys stored without a TTL
        #[arg(long, default_value = "50")]
        no_ttl: u8,

        /// Percentage of requests written as deletes
        #[arg(long, default_value = "0")]
        deletes: u8,

        /// Output directory
        #[arg(short, long, default_value = "traffic_logs")]
        output_dir: PathBuf,

        /// Write buffer size in KB (default: 8192 = 8 MB)
        #[arg(long, default_value = "8192")]
        buffer_size: u32,

        /// RNG seed for a reproducible trace
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Generate {
            rps,
            duration,
            objects,
            popular_traffic,
            popular_objects,
            min_size,
            max_size,
            min_ttl,
            max_ttl,
            no_ttl,
            deletes,
            output_dir,
            buffer_size,
            seed,
        } => {
            let config = TrafficLogConfig {
                rps,
                duration_hours: duration,
                unique_objects: objects,
                popular_traffic_percent: popular_traffic,
                popular_objects_percent: popular_objects,
                min_size,
                max_size,
                min_ttl,
                max_ttl,
                no_ttl_percent: no_ttl,
                delete_percent: deletes,
                output_dir,
                buffer_size_kb: buffer_size,
                start_time: None,
                seed,
            };
            TrafficLogGenerator::new(config).generate()
        }

        Commands::Simulate {
            input_dir,
            max_bytes,
            slab_size,
            factor,
            backends,
            threads,
            seed,
            output_csv,
        } => {
            let config = SimulationConfig {
                input_dir,
                max_bytes,
                slab_size,
                factor,
                backends: parse_backends(backends.as_deref()),
                thread_count: threads.max(1),
                seed,
            };
            run_simulation(config, output_csv)
        }
    }
}

/// Parse backend names, falling back to every backend
fn parse_backends(names: Option<&[String]>) -> Vec<Backend> {
    let Some(names) = names.filter(|n| !n.is_empty()) else {
        return Backend::all();
    };

    let mut selected = Vec::new();
    for name in names {
        match name.parse::<Backend>() {
            Ok(backend) if !selected.contains(&backend) => selected.push(backend),
            Ok(_) => {}
            Err(e) => warn!("{e}, skipping"),
        }
    }

    if selected.is_empty() {
        println!("No valid backends selected, using all available backends");
        Backend::all()
    } else {
        selected
    }
}

/// Run the simulation with the given configuration
fn run_simulation(
    config: SimulationConfig,
    output_csv: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Cache Simulation");
    println!("================");
    println!("Input directory: {}", config.input_dir.display());
    println!(
        "Memory budget: {} bytes ({:.2} MB), slab size {} bytes, factor {}",
        config.max_bytes,
        config.max_bytes as f64 / 1_048_576.0,
        config.slab_size,
        config.factor
    );
    println!(
        "Backends: {:?}",
        config.backends.iter().map(|b| b.as_str()).collect::<Vec<_>>()
    );
    if config.thread_count > 1 {
        println!("Worker threads: {}", config.thread_count);
    }
    println!();

    let result = SimulationRunner::new(config).run()?;

    println!("\nSimulation completed in {:.2?}", result.duration);
    println!("Total requests: {}", result.total_requests);
    println!("Unique keys: {}", result.unique_objects);
    println!(
        "Total bytes: {} ({:.2} MB)",
        result.total_bytes,
        result.total_bytes as f64 / (1024.0 * 1024.0)
    );

    if let Some(csv_path) = output_csv {
        SimulationStats::from_result(&result).export_csv(&csv_path)?;
        println!("\nResults exported to: {}", csv_path.display());
    }

    Ok(())
}
