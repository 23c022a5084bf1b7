//! commitscope-fetch - CLI tool to fetch commit history into the database
//!
//! Drives the fetch pipeline directly against the core library, without
//! going through the HTTP server. Useful for seeding the database and
//! for cron-style refreshes.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/commitscope/data.db
//! - Logs: $XDG_STATE_HOME/commitscope/commitscope.log
//! - Config: $XDG_CONFIG_HOME/commitscope/config.toml

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use commitscope_core::{
    BackoffPolicy, Config, Database, DateRange, FetchOrchestrator, GitHubClient, RepoId,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "commitscope-fetch")]
#[command(about = "Fetch commit history for a repository date range")]
#[command(version)]
struct Args {
    /// Repository owner (defaults to config)
    #[arg(long)]
    owner: Option<String>,

    /// Repository name (defaults to config)
    #[arg(long)]
    repo: Option<String>,

    /// Start date (YYYY-MM-DD), defaults to one year ago
    #[arg(long, short = 's')]
    start_date: Option<NaiveDate>,

    /// End date (YYYY-MM-DD), defaults to yesterday
    #[arg(long, short = 'e')]
    end_date: Option<NaiveDate>,

    /// Ignore cached ranges and re-walk every page
    #[arg(long)]
    no_cache: bool,

    /// Database file path (overrides XDG default)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard = commitscope_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    tracing::info!("commitscope-fetch starting");

    let today = Utc::now().date_naive();
    let start = args.start_date.unwrap_or(today - Duration::days(365));
    let end = args.end_date.unwrap_or(today - Duration::days(1));
    if start > end {
        bail!("start date {} is after end date {}", start, end);
    }
    let range = DateRange::new(start, end);

    let repo = RepoId::new(
        args.owner.unwrap_or_else(|| config.github.default_owner.clone()),
        args.repo.unwrap_or_else(|| config.github.default_name.clone()),
    );

    let db_path = args.database.unwrap_or_else(Config::database_path);
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run migrations")?;

    let client =
        Arc::new(GitHubClient::new(&config.github).context("failed to create GitHub client")?);
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::clone(&db),
        client,
        BackoffPolicy::from_config(&config.fetch),
    ));

    println!("Fetching commits for {} over {}...", repo, range);

    let report = orchestrator.ensure_data(repo, range, args.no_cache).await;

    println!();
    println!("Status:       {}", if report.success { "success" } else { "error" });
    println!("Message:      {}", report.message);
    println!("Cache used:   {}", report.cache_used);
    println!("Pages:        {}", report.pages_fetched);
    println!("Commits:      {}", report.commit_count);
    if let (Some(mean), Some(std)) = (report.mean_changes, report.std_changes) {
        println!("Mean changes: {:.2}", mean);
        println!("Std changes:  {:.2}", std);
    }

    if !report.success {
        std::process::exit(1);
    }

    Ok(())
}
