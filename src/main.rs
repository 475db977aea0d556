//! Sumi-Dispatch main entry point
//!
//! This is the command-line interface running the scheduler with the
//! reference worker pool.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_dispatch::config::{load_config_with_hash, load_proxy_list, Config};
use sumi_dispatch::output::{print_statistics, DispatchStats};
use sumi_dispatch::storage::{SqliteStorage, Storage};
use sumi_dispatch::worker::{run_pool, validate_proxies, Fetcher, DIRECT_PROXY};
use sumi_dispatch::Scheduler;
use tracing_subscriber::EnvFilter;

/// Sumi-Dispatch: crawl task scheduler and proxy-pool manager
///
/// Sumi-Dispatch leases crawl tasks to workers, rotating egress proxies by
/// health and spacing requests to every domain. Interrupted crawls resume
/// from the snapshot database.
#[derive(Parser, Debug)]
#[command(name = "sumi-dispatch")]
#[command(version)]
#[command(about = "Crawl task scheduler and proxy-pool manager", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, ignoring the stored snapshot
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be dispatched without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the snapshot database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_dispatch=info,warn"),
            1 => EnvFilter::new("sumi_dispatch=debug,info"),
            2 => EnvFilter::new("sumi_dispatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_storage(config: &Config) -> anyhow::Result<Option<SqliteStorage>> {
    config
        .storage
        .database_path
        .as_deref()
        .map(|path| {
            SqliteStorage::new(Path::new(path))
                .with_context(|| format!("failed to open snapshot database {}", path))
        })
        .transpose()
}

/// Reads every configured proxy list file
fn load_proxy_files(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut proxies = Vec::new();
    for path in &config.proxy_pool.proxy_files {
        let listed = load_proxy_list(Path::new(path))
            .with_context(|| format!("failed to read proxy list {}", path))?;
        tracing::info!("Read {} proxies from {}", listed.len(), path);
        proxies.extend(listed);
    }
    Ok(proxies)
}

/// Handles the --dry-run mode: validates config and shows what would be dispatched
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Dispatch Dry Run ===\n");

    println!("Scheduler:");
    println!("  Lease duration: {:?}", config.scheduler.lease_duration());
    println!("  Reclaim interval: {:?}", config.scheduler.reclaim_interval());
    println!("  Max retries: {}", config.scheduler.max_retries);
    println!("  Retry delay: {:?}", config.scheduler.retry_delay());

    println!("\nThrottle:");
    println!(
        "  Default: {} concurrent, {}ms apart",
        config.throttle.max_concurrency, config.throttle.min_interval_ms
    );
    for entry in &config.throttle.domain {
        println!(
            "  - {}: {} concurrent, {}ms apart",
            entry.domain,
            entry.max_concurrency.unwrap_or(config.throttle.max_concurrency),
            entry.min_interval_ms.unwrap_or(config.throttle.min_interval_ms)
        );
    }

    println!("\nProxies ({}):", config.proxy_pool.proxies.len());
    for address in &config.proxy_pool.proxies {
        println!("  - {}", address);
    }
    for path in &config.proxy_pool.proxy_files {
        println!("  + proxy list {}", path);
    }
    if let Some(url) = &config.proxy_pool.validation_url {
        println!("  Validated against {} before crawling", url);
    }

    println!("\nWorkers: {}", config.worker.count);
    match &config.storage.database_path {
        Some(path) => println!("Database: {}", path),
        None => println!("Database: none (state is not persisted)"),
    }

    // Dedup the seeds the way the scheduler would
    let scheduler = Scheduler::new(config);
    let mut accepted = 0;
    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        match scheduler.enqueue(seed, 0) {
            Ok(Some(_)) => {
                accepted += 1;
                println!("  * {}", seed);
            }
            Ok(None) => println!("  * {} (duplicate)", seed),
            Err(e) => println!("  * {} (rejected: {})", seed, e),
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start dispatching {} distinct seed URLs", accepted);
}

/// Handles the --stats mode: shows statistics from the snapshot database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let Some(storage) = open_storage(config)? else {
        anyhow::bail!("no database-path configured in [storage]");
    };

    match storage.snapshot_info()? {
        Some(info) => println!(
            "Snapshot saved {} ({} tasks)\n",
            info.saved_at.to_rfc3339(),
            info.task_count
        ),
        None => {
            println!("No snapshot stored yet");
            return Ok(());
        }
    }

    if let Some(snapshot) = storage.load_snapshot()? {
        let stats = DispatchStats::from_snapshot(&snapshot, config.proxy_pool.max_score);
        print_statistics(&stats);
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(mut config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    let listed = load_proxy_files(&config)?;
    if config.proxy_pool.proxies.is_empty() && listed.is_empty() {
        tracing::warn!("No proxies configured, fetching directly");
        config.proxy_pool.proxies.push(DIRECT_PROXY.to_string());
    }

    let mut storage = open_storage(&config)?;
    let snapshot = match storage.as_mut() {
        Some(storage) if fresh => {
            tracing::info!("Starting fresh crawl (ignoring previous state)");
            storage.clear()?;
            None
        }
        Some(storage) => {
            if let Some(info) = storage.snapshot_info()? {
                if info.config_hash != config_hash {
                    tracing::warn!("Configuration changed since the snapshot was saved");
                }
            }
            storage.load_snapshot()?
        }
        None => None,
    };

    let scheduler = match snapshot {
        Some(snapshot) => Scheduler::restore(&config, snapshot),
        None => {
            let scheduler = Scheduler::new(&config);
            let mut seeded = 0;
            for seed in &config.seeds {
                if scheduler.enqueue(seed, 0)?.is_some() {
                    seeded += 1;
                }
            }
            tracing::info!("Seeded {} URLs", seeded);
            scheduler
        }
    };
    scheduler.add_proxies(&listed);
    let scheduler = Arc::new(scheduler);

    if let Some(url) = &config.proxy_pool.validation_url {
        let fetcher = Arc::new(Fetcher::new(&config.worker));
        let summary = validate_proxies(
            Arc::clone(&scheduler),
            fetcher,
            url,
            config.proxy_pool.validation_concurrency,
        )
        .await?;
        if summary.checked > 0 && summary.healthy == 0 {
            tracing::warn!("No proxy passed validation");
        }
    }

    tokio::select! {
        result = run_pool(Arc::clone(&scheduler), &config) => {
            let summaries = result?;
            let fetched: u64 = summaries.iter().map(|s| s.fetched).sum();
            tracing::info!("Crawl finished: {} fetches by {} workers", fetched, summaries.len());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, saving state");
        }
    }

    if let Some(storage) = storage.as_mut() {
        storage
            .save_snapshot(&scheduler.snapshot(), config_hash)
            .context("failed to save snapshot")?;
    }

    print_statistics(&scheduler.stats());
    Ok(())
}
