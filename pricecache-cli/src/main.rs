//! pricecache CLI: fetch a cached price series and inspect the cache.
//!
//! Commands:
//! - `fetch`: resolve a symbol/date range through the cache and print the first rows
//! - `cache status`: list cached tables with row counts and date ranges
//! - `cache remove`: delete one cached table

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pricecache_core::{CacheConfig, Observation, ParquetStore, Query, SeriesCache, TableStore};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "pricecache",
    about = "Daily price history with log returns, cached locally as Parquet"
)]
struct Cli {
    /// TOML config file (storage root, provider settings).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory. Overrides the config file; defaults to ./data.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a series from cache, downloading it on a miss.
    Fetch {
        /// Ticker symbol.
        #[arg(default_value = "SPY")]
        symbol: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long, default_value = "2018-01-01")]
        start: String,

        /// End date (YYYY-MM-DD), exclusive.
        #[arg(long, default_value = "2024-01-01")]
        end: String,

        /// Number of rows to print.
        #[arg(long, default_value_t = 5)]
        rows: usize,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached tables.
    Status,
    /// Remove the cached table for one symbol/date range.
    Remove {
        symbol: String,
        start: String,
        end: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.cache_dir)?;

    match cli.command {
        Commands::Fetch {
            symbol,
            start,
            end,
            rows,
        } => run_fetch(&config, &symbol, &start, &end, rows),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config.storage_root),
            CacheAction::Remove { symbol, start, end } => {
                run_cache_remove(&config.storage_root, &symbol, &start, &end)
            }
        },
    }
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<CacheConfig> {
    let config = match path {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    Ok(match cache_dir {
        Some(dir) => config.with_storage_root(dir),
        None => config,
    })
}

fn run_fetch(config: &CacheConfig, symbol: &str, start: &str, end: &str, rows: usize) -> Result<()> {
    let query = Query::parse(symbol, start, end)?;
    let cache = SeriesCache::from_config(config)?;

    let table = cache
        .fetch(&query)
        .with_context(|| format!("fetching {query}"))?;

    println!();
    println!("{} rows for {query}", table.len());
    println!();
    print_rows(table.head(rows));
    Ok(())
}

fn print_rows(rows: &[Observation]) {
    println!("{:<12} {:>12} {:>14} {:>12}", "Date", "Close", "Volume", "LogReturn");
    println!("{}", "-".repeat(53));
    for row in rows {
        let log_return = row
            .log_return
            .map(|r| format!("{r:.6}"))
            .unwrap_or_else(|| "NaN".to_string());
        println!(
            "{:<12} {:>12.4} {:>14} {:>12}",
            row.date.to_string(),
            row.close,
            row.volume,
            log_return
        );
    }
}

fn run_cache_status(root: &Path) -> Result<()> {
    if !root.exists() {
        println!("Cache directory does not exist: {}", root.display());
        return Ok(());
    }

    let store = ParquetStore::new(root);
    let entries = store.entries()?;

    if entries.is_empty() {
        println!("Cache is empty: {}", root.display());
        return Ok(());
    }

    let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();

    println!("Cache: {}", root.display());
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!("{:<36} {:<25} {:<10} {:>10}", "Key", "Date Range", "Rows", "Size");
    println!("{}", "-".repeat(84));
    for entry in &entries {
        let (range, rows) = match &entry.meta {
            Some(meta) => match (meta.first_date, meta.last_date) {
                (Some(first), Some(last)) => (format!("{first} to {last}"), meta.row_count.to_string()),
                _ => ("(empty)".to_string(), meta.row_count.to_string()),
            },
            None => ("(no meta)".to_string(), "?".to_string()),
        };
        println!(
            "{:<36} {:<25} {:<10} {:>10}",
            entry.key.as_str(),
            range,
            rows,
            format_size(entry.size_bytes)
        );
    }

    Ok(())
}

fn run_cache_remove(root: &Path, symbol: &str, start: &str, end: &str) -> Result<()> {
    let key = Query::parse(symbol, start, end)?.cache_key();
    let store = ParquetStore::new(root);

    if !store.exists(&key) {
        println!("Not cached: {key}");
        return Ok(());
    }

    store.remove(&key)?;
    println!("Removed: {key}");
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
