use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fbref_ingest::config::{IngestConfig, default_db_path};
use fbref_ingest::fetcher::{DocumentSource, RateLimitedFetcher};
use fbref_ingest::http_client::HttpTransport;
use fbref_ingest::logging;
use fbref_ingest::pipeline::{Pipeline, RunSummary};
use fbref_ingest::storage::open_storage;

#[derive(Debug, Parser)]
#[command(name = "fbref_ingest", about = "Ingest fixtures and player box scores into a local or remote store")]
struct Cli {
    /// SQLite path or postgres:// url. Defaults to DATABASE_URL, then the cache dir.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Print the final summary as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scrape one or more Scores-and-Fixtures listings.
    Ingest {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Drop and recreate every table before ingesting.
        #[arg(long)]
        recreate: bool,

        /// Process at most this many new matches per listing.
        #[arg(long)]
        max_matches: Option<usize>,
    },
    /// Fetch player stats for stored matches that have none.
    CatchUp,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let cli = Cli::parse();
    let config = IngestConfig::from_env();
    logging::init(&config.log_level);

    let db_url = cli
        .db
        .clone()
        .or_else(|| config.database_url.clone())
        .or_else(|| default_db_path().map(|p| p.display().to_string()))
        .context("unable to resolve database location")?;
    let mut store = open_storage(&db_url).with_context(|| format!("open storage {db_url}"))?;

    let transport = HttpTransport::new(config.fetch.timeout)?;
    let fetcher = RateLimitedFetcher::new(transport, &config.fetch);
    let mut pipeline = Pipeline::from_config(fetcher, store.as_mut(), &config);

    let outcome = match &cli.command {
        Command::Ingest {
            urls,
            recreate,
            max_matches,
        } => pipeline
            .prepare_storage(*recreate)
            .and_then(|()| pipeline.run(urls, *max_matches)),
        Command::CatchUp => pipeline
            .prepare_storage(false)
            .and_then(|()| pipeline.reconcile_missing_stats()),
    };

    print_summary(pipeline.totals(), pipeline.source().total_calls(), cli.json);
    outcome.context("ingest failed")?;
    Ok(())
}

fn print_summary(summary: &RunSummary, fetch_calls: u64, json: bool) {
    if json {
        if let Ok(out) = serde_json::to_string_pretty(summary) {
            println!("{out}");
        }
        return;
    }
    println!("Ingest finished");
    println!(
        "Matches added: {}/{}",
        summary.matches_added, summary.matches_processed
    );
    println!(
        "Player stats added: {}/{}",
        summary.player_stats_added, summary.player_stats_processed
    );
    println!("Provenance entries: {}", summary.provenance_written);
    println!("Total fetch calls: {fetch_calls}");
    if !summary.errors.is_empty() {
        println!("Errors: {}", summary.errors.len());
        for err in summary.errors.iter().take(8) {
            println!(" - {err}");
        }
    }
}
