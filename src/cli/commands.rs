//! CLI commands implementation.

use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::client::ApiClient;
use crate::config::{ClientConfig, ViewQueueConfig};
use crate::views::ViewQueue;

#[derive(Parser)]
#[command(name = "mnet")]
#[command(about = "GyaanManthan request layer - throttled fetch tool")]
#[command(version)]
pub struct Cli {
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
    /// Fetch URLs through the throttled client
    Fetch {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,
        /// Maximum concurrent requests
        #[arg(short, long, default_value = "2")]
        concurrency: usize,
        /// Retry budget per request
        #[arg(short, long, default_value = "2")]
        retries: u32,
        /// Print response bodies
        #[arg(short, long)]
        body: bool,
    },

    /// Register view events against an endpoint, paced and de-duplicated
    Views {
        /// View registration endpoint
        endpoint: String,
        /// Entities as kind:id pairs (e.g. post:42)
        #[arg(required = true)]
        entities: Vec<String>,
        /// Pause between registrations, in milliseconds
        #[arg(short, long, default_value = "750")]
        pace_ms: u64,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            urls,
            concurrency,
            retries,
            body,
        } => cmd_fetch(urls, concurrency, retries, body, cli.verbose).await,
        Commands::Views {
            endpoint,
            entities,
            pace_ms,
        } => cmd_views(endpoint, entities, pace_ms).await,
    }
}

async fn cmd_fetch(
    urls: Vec<String>,
    concurrency: usize,
    retries: u32,
    body: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env();
    config.max_concurrent = concurrency;
    config.max_retries = retries;
    let client = ApiClient::with_config(config)?;

    let pb = ProgressBar::new(urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut handles = Vec::with_capacity(urls.len());
    for url in urls {
        let client = client.clone();
        let pb = pb.clone();
        handles.push(tokio::spawn(async move {
            let response = client.get(&url).await;
            pb.inc(1);
            (url, response)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(result) = handle.await {
            results.push(result);
        }
    }
    pb.finish_and_clear();

    let mut failures = 0usize;
    for (url, response) in &results {
        let status = if response.status == 0 {
            "---".to_string()
        } else {
            response.status.to_string()
        };
        if response.ok {
            println!("{} {} {}", style("ok ").green(), status, url);
        } else {
            failures += 1;
            println!(
                "{} {} {} {}",
                style("err").red(),
                status,
                url,
                response.error.as_deref().unwrap_or_default()
            );
        }
        if body {
            if let Some(data) = &response.data {
                println!("{}", serde_json::to_string_pretty(data)?);
            } else if let Some(text) = &response.text {
                println!("{}", text);
            }
        }
    }

    let stats = client.stats().await;
    println!(
        "\n{} requests, {} deduped, {} retries, {} rate-limit hits",
        stats.requests, stats.deduped, stats.retries, stats.rate_limit_hits
    );
    for cooldown in &stats.cooldowns {
        println!(
            "  {} cooling down for {:?}",
            cooldown.origin, cooldown.remaining
        );
    }

    if verbose {
        for log in client.recent_requests().await {
            println!(
                "  {} {} status={} attempts={} {}ms",
                log.method,
                log.url,
                log.status.map_or("---".to_string(), |s| s.to_string()),
                log.attempts,
                log.duration_ms
            );
        }
    }

    if failures > 0 {
        anyhow::bail!("{} request(s) failed", failures);
    }
    Ok(())
}

async fn cmd_views(endpoint: String, entities: Vec<String>, pace_ms: u64) -> anyhow::Result<()> {
    let client = ApiClient::with_config(ClientConfig::from_env())?;
    let mut config = ViewQueueConfig::new(endpoint);
    config.pace = Duration::from_millis(pace_ms);
    let queue = ViewQueue::new(client, config);

    let total = entities.len();
    let mut queued = 0usize;
    for entry in entities {
        let Some((kind, id)) = entry.split_once(':') else {
            anyhow::bail!("invalid entity '{}', expected kind:id", entry);
        };
        if queue.enqueue(kind, id) {
            queued += 1;
        }
    }

    println!("queued {} of {} view events", queued, total);
    queue.shutdown().await;
    Ok(())
}
