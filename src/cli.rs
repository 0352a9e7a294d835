//! CLI commands implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing::error;

use crate::browser::{CdpDriver, Driver};
use crate::challenge::{
    AudioChallengeSolver, ChallengeResolver, ChallengeSolver, HttpTranscriber, NoopSolver,
};
use crate::config::CraftConfig;
use crate::download::DownloadAttemptMachine;
use crate::ledger::LedgerRepository;
use crate::orchestrator::{CrawlOrchestrator, NeverHalt, StalenessPolicy, StopPolicy};
use crate::pacing::PacingController;
use crate::site;

#[derive(Parser)]
#[command(name = "craft")]
#[command(about = "Design asset acquisition for paginated marketplace catalogs")]
#[command(version)]
pub struct Cli {
    /// Config file path (default: craftacquire.toml in the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the catalog from the persisted page cursor
    Run {
        /// Run with a visible browser window
        #[arg(long)]
        headed: bool,

        /// Override the configured page count
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// Show ledger statistics and the page cursor
    Stats,
}

/// Parse arguments and dispatch.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = CraftConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { headed, max_pages } => run_crawl(config, headed, max_pages).await,
        Commands::Stats => show_stats(config),
    }
}

async fn run_crawl(mut config: CraftConfig, headed: bool, max_pages: Option<u32>) -> Result<()> {
    if headed {
        config.browser.headless = false;
    }
    if let Some(pages) = max_pages {
        config.total_pages = pages;
    }

    let download_root = config.download_root();
    std::fs::create_dir_all(&download_root)
        .with_context(|| format!("Failed to create {}", download_root.display()))?;

    let ledger = LedgerRepository::new(config.db_path())
        .context("Failed to open the ledger database")?;

    let solver: Box<dyn ChallengeSolver> = match config.transcriber_endpoint.as_deref() {
        Some(endpoint) => Box::new(AudioChallengeSolver::new(
            Box::new(HttpTranscriber::new(endpoint)),
            std::env::temp_dir(),
        )),
        None => {
            println!(
                "{} no transcriber endpoint configured; challenges will only be retried",
                style("note:").yellow()
            );
            Box::new(NoopSolver)
        }
    };
    let resolver = ChallengeResolver::new(
        site::CHALLENGE_MARKERS.iter().map(|s| s.to_string()).collect(),
        solver,
    );

    let stop_policy: Box<dyn StopPolicy> = match config.max_item_age_days {
        Some(max_age_days) => Box::new(StalenessPolicy { max_age_days }),
        None => Box::new(NeverHalt),
    };

    let pacing = PacingController::new(config.pacing.clone());
    let machine = DownloadAttemptMachine::new(config.download.clone());
    let browser_config = config.browser.clone();

    let mut orchestrator =
        CrawlOrchestrator::new(config, ledger, pacing, machine, resolver, stop_policy);

    let mut driver = CdpDriver::launch(browser_config)
        .await
        .context("Failed to start the browser")?;

    let result = orchestrator.run(&mut driver).await;
    if let Err(e) = driver.quit().await {
        error!("Browser shutdown failed: {}", e);
    }

    let summary = result?;
    println!(
        "{} {} pages, {} items processed, {} skipped{}",
        style("Crawl finished:").green().bold(),
        summary.pages_visited,
        summary.items_processed,
        summary.items_skipped,
        if summary.halted {
            " (halted by stop policy)"
        } else {
            ""
        }
    );
    Ok(())
}

fn show_stats(config: CraftConfig) -> Result<()> {
    let ledger = LedgerRepository::new(config.db_path())
        .context("Failed to open the ledger database")?;

    let stats = ledger.stats()?;
    if stats.by_status.is_empty() {
        println!("Ledger is empty.");
    } else {
        println!("{}", style("Ledger:").bold());
        for (status, count) in &stats.by_status {
            println!("  {:<16} {}", status, count);
        }
        println!("  {:<16} {}", style("total").dim(), stats.total);
        if let Some(last) = &stats.last_crawled_at {
            println!("  {:<16} {}", style("last crawl").dim(), last);
        }
    }

    let cursor = ledger.progress(&config.base_url, config.total_pages)?;
    println!(
        "{} page {}/{} of {}",
        style("Cursor:").bold(),
        cursor.current_page,
        cursor.total_pages,
        cursor.base_url
    );
    Ok(())
}
