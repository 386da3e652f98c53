//! `unidirector` command line.
//!
//! Loads a configuration, builds its pools and drives them through the
//! lifecycle so a topology can be checked, inspected and exercised without a
//! host process.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use unidirector::config::load_config;
use unidirector::lifecycle::{build_topology, teardown, Event, Registry, Topology};
use unidirector::load_balancer::{ReportFormat, RequestContext};
use unidirector::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "unidirector")]
#[command(about = "Weighted backend pools with DNS-driven membership", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "unidirector.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and build its pools
    Check,
    /// Print every pool's members and health
    Report {
        #[arg(long)]
        json: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Run selections against one pool and print the chosen backends
    Resolve {
        #[arg(short, long)]
        pool: String,
        #[arg(long, default_value = "/")]
        path: String,
        /// Request header as NAME=VALUE, repeatable
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Warm the configuration and report while DNS lookups run
    Run {
        /// Stop after this many seconds (0 = one report)
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        /// Seconds between reports
        #[arg(long, default_value_t = 5)]
        interval: u64,
        #[arg(long)]
        json: bool,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", raw))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config.observability.log_level, config.observability.log_format);

    tracing::info!(
        config = %config.name,
        path = %cli.config.display(),
        pools = config.pools.len(),
        "unidirector v0.1.0 starting"
    );

    let registry = Registry::global();
    let topology = build_topology(&config, registry)?;

    match cli.command {
        Commands::Check => {
            println!("{}: {} pools OK", config.name, topology.pools().len());
        }
        Commands::Report { json, verbose } => {
            print_reports(&topology, json, verbose);
        }
        Commands::Resolve {
            pool,
            path,
            headers,
            count,
        } => {
            let target = topology
                .pool(&pool)
                .ok_or_else(|| format!("unknown pool {}", pool))?;
            let ctx = headers
                .into_iter()
                .fold(RequestContext::new(path), |ctx, (name, value)| {
                    ctx.with_header(name, value)
                });
            for _ in 0..count {
                match target.resolve(&ctx) {
                    Some(backend) => match backend.address() {
                        Some(addr) => println!("{}\t{}", backend.name(), addr),
                        None => println!("{}\t({})", backend.name(), backend.kind()),
                    },
                    None => println!("-"),
                }
            }
        }
        Commands::Run {
            seconds,
            interval,
            json,
        } => {
            registry.on_event(&config.name, Event::Warm)?;
            let deadline = Instant::now() + Duration::from_secs(seconds);
            let interval = Duration::from_secs(interval.max(1));

            // Give the first resolution pass a moment before reporting.
            thread::sleep(Duration::from_millis(200));
            loop {
                print_reports(&topology, json, true);
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(interval));
            }
        }
    }

    teardown(registry, topology)?;
    Ok(())
}

fn print_reports(topology: &Topology, json: bool, verbose: bool) {
    if json {
        let reports: serde_json::Map<String, serde_json::Value> = topology
            .pools()
            .iter()
            .map(|pool| {
                let report = pool.report(ReportFormat::Json, verbose);
                let value = serde_json::from_str(&report).unwrap_or(serde_json::Value::String(report));
                (pool.name().to_string(), value)
            })
            .collect();
        println!("{}", serde_json::Value::Object(reports));
    } else {
        for pool in topology.pools() {
            println!("[{}] ({})", pool.name(), pool.strategy_name());
            println!("{}", pool.report(ReportFormat::Text, verbose));
        }
    }
}
