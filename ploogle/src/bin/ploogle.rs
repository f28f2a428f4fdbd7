//! Ploogle server process
//!
//! Brings the index up, optionally heals it and schedules the daily heal, and
//! answers one-off queries from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ploogle::{
    schedule, Combine, Config, Crawler, FanFicFare, HealJob, HttpListing, IndexManager,
    QueryParams, SearchOutput, SearchService,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve until interrupted, healing on startup and daily when configured
    Run,
    /// Run one heal pass and exit
    Heal,
    /// Print one page of results as JSON
    Search {
        query: String,

        /// 1-based page; out-of-range values are clamped
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,

        /// How terms combine: AND or OR
        #[arg(long, default_value_t = Combine::Or)]
        op: Combine,

        /// Only results hosted under this domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Keep results whose metadata contains the query literally
        #[arg(long)]
        match_all: bool,

        /// Print one random result URL instead of a page
        #[arg(long)]
        random: bool,
    },
    /// Print one random URL, from the query's results if one is given
    Lucky { query: Option<String> },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn heal_job(config: &Config, index: Arc<IndexManager>) -> Result<Arc<HealJob>> {
    let listing = HttpListing::new(&config.listing_url).context("Invalid listing endpoint")?;
    let converter = FanFicFare {
        program: config.fanficfare_program(),
        work_dir: config.document_dir(),
        timeout: config.convert_timeout(),
    };
    let crawler = Crawler::new(index, Arc::new(listing), Arc::new(converter), config.crawl_settings());
    Ok(Arc::new(HealJob::new(crawler)))
}

async fn run(config: &Config, index: Arc<IndexManager>) -> Result<()> {
    let job = heal_job(config, index)?;

    if config.crawler_mode {
        tokio::spawn(schedule::run_daily(job.clone(), config.crawl_at));
    }
    if config.index_known_dirty {
        let job = job.clone();
        tokio::spawn(async move {
            job.trigger().await;
        });
    }

    info!("Ploogle running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config;

    let index = Arc::new(IndexManager::new(config.index_settings()));
    index
        .initialize(config.init_mode())
        .await
        .context("Index initialization failed")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, index).await?,
        Command::Heal => {
            let job = heal_job(&config, index)?;
            if let Some(result) = job.trigger().await {
                let report = result.context("Heal failed")?;
                println!("{:?}", report);
            }
        }
        Command::Search {
            query,
            page,
            op,
            domain,
            match_all,
            random,
        } => {
            let service = SearchService::new(index, config.page_size);
            let params = QueryParams {
                page,
                operator: op,
                domain,
                match_all,
                random,
                ..QueryParams::default()
            };
            match service.search(&query, &params)? {
                SearchOutput::Page(page) => println!("{}", serde_json::to_string_pretty(&page)?),
                SearchOutput::Random(url) => println!("{}", url.unwrap_or_default()),
            }
        }
        Command::Lucky { query } => {
            let service = SearchService::new(index, config.page_size);
            if let Some(url) = service.random(query.as_deref())? {
                println!("{}", url);
            }
        }
    }

    Ok(())
}
