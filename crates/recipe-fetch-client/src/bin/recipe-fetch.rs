use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use recipe_fetch_client::{FetchConfig, RemoteStore, ScatterGatherFetcher};
use recipe_store_api::DEFAULT_PAGE_LIMIT;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "recipe-fetch")]
#[command(about = "Pull every record from a recipe store with concurrent page requests")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    base_url: String,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    page_size: usize,
    #[arg(long)]
    page_timeout_ms: Option<u64>,
    #[arg(long)]
    deadline_ms: Option<u64>,
    #[arg(long)]
    max_in_flight: Option<usize>,
}

impl Cli {
    fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig::from_env();
        if let Some(ms) = self.page_timeout_ms {
            config.page_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.deadline_ms {
            config.deadline = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_in_flight {
            config.max_in_flight = max.max(1);
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.fetch_config();
    let remote = RemoteStore::new(&cli.base_url, config.probe_timeout)?;

    let total = remote.fetch_total_count().await?;
    tracing::info!("remote store reports {total} records");

    let fetcher = ScatterGatherFetcher::new(remote, config);
    let records = fetcher.fetch_all(total, cli.page_size).await?;
    tracing::info!("total records retrieved: {}", records.len());
    for record in &records {
        tracing::info!("record {}: {}", record.id, record.name);
    }
    Ok(())
}
