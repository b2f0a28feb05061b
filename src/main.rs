//! Sitegraph: polite site crawler with link-graph analysis
//!
//! Runs a crawl from the terminal with the in-memory store.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sitegraph::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sitegraph")]
#[command(about = "Crawl a site and analyse its link graph")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "sitegraph.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl one or more sites and print the report
    Crawl {
        /// Seed URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Maximum link depth from the seeds
        #[arg(short = 'd', long)]
        max_depth: Option<u32>,

        /// Maximum pages to fetch
        #[arg(short = 'n', long)]
        page_cap: Option<usize>,

        /// Delay between requests to one host in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Render pages through the configured render service
        #[arg(long)]
        js: bool,

        /// Ignore robots.txt
        #[arg(long)]
        ignore_robots: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    config.logging.init(cli.verbose)?;

    match cli.command {
        Commands::Crawl {
            urls,
            max_depth,
            page_cap,
            delay_ms,
            js,
            ignore_robots,
            json,
        } => {
            let overrides = commands::crawl::CrawlOverrides {
                max_depth,
                page_cap,
                delay_ms,
                enable_js: js,
                ignore_robots,
            };
            commands::crawl::crawl(config, urls, overrides, json).await
        }
        Commands::Init { path, force } => commands::init::init_config(path, force),
    }
}
