use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod dedup;
mod downloader;
mod episode;
mod error;
mod library;
mod models;
mod pattern;
mod processor;
mod report;
mod search_scraper;

use config::{load_series_list, Settings};
use processor::{plan_series, Processor};
use search_scraper::SearchScraper;

#[derive(Parser)]
#[command(name = "torrentwatch")]
#[command(about = "Fetches new episodes of tracked series and keeps only the best release", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every tracked series, download new episodes and clean up
    Run {
        #[command(flatten)]
        settings: Settings,

        /// Resolve and plan only; no downloads or deletions
        #[arg(long)]
        dry_run: bool,

        /// Write the run report as JSON to this file
        #[arg(long, env = "TORRENTWATCH_REPORT")]
        report: Option<PathBuf>,
    },

    /// Show which releases would be picked for one series
    Resolve {
        #[command(flatten)]
        settings: Settings,

        /// Folder name of the series in the list
        folder: String,
    },

    /// Print the raw search listing for an uploader
    Search {
        uploader: String,

        /// Search query
        query: String,

        #[arg(long, env = "TORRENTWATCH_BASE_URL", default_value = "https://nyaa.si")]
        base_url: String,
    },

    /// Download a torrent from a magnet link or .torrent file
    Download {
        /// The magnet link or path to .torrent file
        torrent: String,

        /// Download directory
        #[arg(short, long, default_value = "./downloads")]
        output: PathBuf,

        #[arg(long, default_value_t = 60)]
        start_timeout_secs: u64,
    },
}

fn format_timestamp(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn resolve(settings: Settings, folder: &str) -> Result<()> {
    let list = load_series_list(&settings.list);
    let entry = list
        .values()
        .flatten()
        .find(|e| e.folder == folder)
        .with_context(|| format!("No series with folder {:?} in {}", folder, settings.list.display()))?;

    let scraper = SearchScraper::new(&settings.base_url)?;
    let results = scraper.search(&entry.uploader, &entry.query).await;
    let total = results.len();
    let plan = plan_series(entry, results);

    match &plan.pattern {
        Some(p) => println!("Pattern: {} ({:?})", p.as_str(), p.source),
        None => println!("Pattern: none matched"),
    }
    println!("{} result(s), {} winner(s)\n", total, plan.winners.len());
    println!("{:-<120}", "");
    for episode in &plan.winners {
        println!(
            "Season {} | Episode {} | {}",
            episode.identity.season_number, episode.identity.episode_number, episode.title()
        );
        println!("   Published: {}", format_timestamp(episode.result.timestamp));
    }
    println!("{:-<120}", "");

    for (key, attrs) in &plan.cleanup {
        println!("Cleanup {:?}: {:?}", key, attrs);
    }
    Ok(())
}

async fn search(base_url: &str, uploader: &str, query: &str) -> Result<()> {
    let scraper = SearchScraper::new(base_url)?;
    let results = scraper.try_search(uploader, query).await?;

    if results.is_empty() {
        println!("No results found for: {}", query);
        return Ok(());
    }

    println!("\nSearch results for: {}\n", query);
    println!("{:-<120}", "");
    for (i, result) in results.iter().enumerate() {
        println!("{}. {}", i + 1, result.title);
        println!("   Size: {} | Published: {}", result.size, format_timestamp(result.timestamp));
        println!("   Magnet: {}", result.magnet_link);
        println!("{:-<120}", "");
    }
    println!("\nTotal results: {}", results.len());
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            settings,
            dry_run,
            report,
        } => {
            let list = load_series_list(&settings.list);
            let processor = Processor::new(settings, dry_run)?;
            let summary = processor.run(&list).await;
            if let Some(path) = report {
                summary.write_json(&path)?;
                info!("Report written to {}", path.display());
            }
        }
        Commands::Resolve { settings, folder } => {
            resolve(settings, &folder).await?;
        }
        Commands::Search {
            uploader,
            query,
            base_url,
        } => {
            search(&base_url, &uploader, &query).await?;
        }
        Commands::Download {
            torrent,
            output,
            start_timeout_secs,
        } => {
            downloader::download_torrent(&torrent, output, Duration::from_secs(start_timeout_secs)).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}
