//! loglink - game-server log analyzer for shared accounts
//!
//! Ingests server log files into SQLite, extracting account
//! connect/disconnect events, and answers graph queries that link accounts
//! to every IP address they have shared, directly or transitively.

mod config;
mod db;
mod error;
mod ingest;
mod parser;
mod resolver;
mod retrieve;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::ingest::Pipeline;
use crate::resolver::Resolver;
use crate::retrieve::HttpSource;

#[derive(Debug, Parser)]
#[command(name = "loglink", about = "Game-server log file analyzer for shared accounts")]
struct Cli {
    /// Account ID to resolve into its full shared-IP component
    acct_id: Option<i64>,

    /// List the IP addresses one account has connected from
    #[arg(long, value_name = "ACCT_ID")]
    ips: Option<i64>,

    /// List the accounts seen on an IP address
    #[arg(long, value_name = "ADDR")]
    ip: Option<String>,

    /// Retrieve new log files from the remote source
    #[arg(short, long)]
    retrieve: bool,

    /// Parse new log files
    #[arg(short, long)]
    parse: bool,

    /// Download and parse new log files
    #[arg(short, long)]
    update: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db = Database::new(&config.database).await?;
    db.run_migrations().await?;

    if let Some(acct_id) = cli.acct_id {
        let resolution = Resolver::new(db.clone()).resolve(acct_id).await?;
        println!("{}", serde_json::to_string_pretty(&resolution)?);
    }

    if let Some(acct_id) = cli.ips {
        let ips = Resolver::new(db.clone()).ips_for_account(acct_id).await?;
        println!("{}", serde_json::to_string_pretty(&ips)?);
    }

    if let Some(addr) = &cli.ip {
        let accounts = Resolver::new(db.clone()).accounts_for_ip(addr).await?;
        println!("{}", serde_json::to_string_pretty(&accounts)?);
    }

    if cli.retrieve || cli.update {
        download(&config).await;
    }

    if cli.parse || cli.update {
        run_ingestion(db, &config).await?;
    }

    Ok(())
}

/// Fetch new log files. Transfer failures are not fatal; ingestion proceeds
/// with whatever is already local.
async fn download(config: &Config) {
    if !config.retrieval_enabled() {
        warn!("Retrieval requested but no retrieval.base_url is configured");
        return;
    }

    info!("Downloading new log files");
    let source = HttpSource::new(&config.retrieval, &config.scan.directory);
    if let Err(e) = retrieve::retrieve_new_files(&source, &config.scan.directory).await {
        warn!("Could not connect or download new files: {}", e);
    }
}

async fn run_ingestion(db: Database, config: &Config) -> Result<()> {
    info!("Parsing new log files. Press CTRL-C to exit.");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Terminating, letting in-flight files finish...");
            let _ = shutdown_tx.send(true);
        }
    });

    let pipeline = Pipeline::new(db, config.scan.clone());
    let summary = pipeline.run(shutdown_rx).await?;

    for report in &summary.reports {
        if let Some(error) = &report.error {
            warn!("File {} failed: {}", report.path, error);
        }
    }
    info!(
        "Ingestion summary: {} files processed, {} failed, {} skipped, {} events, {} lines skipped, {} duplicates removed",
        summary.files_processed,
        summary.files_failed,
        summary.files_skipped,
        summary.events_created,
        summary.lines_skipped,
        summary.duplicates_removed
    );

    Ok(())
}
