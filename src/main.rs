//! Scheduler binary: spawns one collection loop per enabled source plus
//! the hourly analysis and daily cleanup loops, then waits for ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use skinarb::arbitrage::ArbitrageDetector;
use skinarb::collectors::{BuffAdapter, SourceAdapter, SteamAdapter, YoupinAdapter};
use skinarb::config::{Config, SourceConfig};
use skinarb::models::Source;
use skinarb::net::{RetryConfig, RetryingFetcher, TokenBucket};
use skinarb::notify::WebhookNotifier;
use skinarb::orchestrator::CollectionOrchestrator;
use skinarb::pipeline::PipelineService;
use skinarb::storage::MarketDb;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skinarb", about = "CS2 marketplace price collector and arbitrage scanner")]
struct Args {
    /// Run one collection + analysis pass and exit.
    #[arg(long)]
    once: bool,

    /// Restrict collection to a single source (steam, buff, youpin).
    #[arg(long)]
    source: Option<Source>,
}

fn fetcher(client: &reqwest::Client, cfg: &SourceConfig) -> RetryingFetcher {
    RetryingFetcher::new(
        client.clone(),
        Arc::new(TokenBucket::per_minute(cfg.requests_per_minute, cfg.burst)),
        RetryConfig {
            max_attempts: cfg.max_attempts,
            request_timeout: cfg.request_timeout,
            backoff_base: cfg.backoff_base,
        },
    )
}

fn build_adapters(config: &Config, client: &reqwest::Client) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if config.steam.enabled {
        adapters.push(Arc::new(SteamAdapter::new(fetcher(client, &config.steam))));
    }
    if config.buff.enabled {
        adapters.push(Arc::new(BuffAdapter::new(
            fetcher(client, &config.buff),
            config.buff_session_cookie.clone(),
        )));
    }
    if config.youpin.enabled {
        // Credential presence is validated with the rest of the config;
        // empty strings still fail here.
        adapters.push(Arc::new(
            YoupinAdapter::new(
                fetcher(client, &config.youpin),
                config.youpin_api_key.clone().unwrap_or_default(),
                config.youpin_api_secret.clone().unwrap_or_default(),
            )
            .context("constructing youpin adapter")?,
        ));
    }
    Ok(adapters)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("loading configuration")?;
    let db = MarketDb::open(&config.database_path)?;

    let client = reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
        .context("building http client")?;

    let adapters = build_adapters(&config, &client)?;
    if adapters.is_empty() {
        anyhow::bail!("all sources disabled, nothing to do");
    }

    let service = Arc::new(PipelineService::new(
        db.clone(),
        adapters,
        CollectionOrchestrator::new(db, config.max_items_per_run),
        ArbitrageDetector::new(config.min_profit_rate),
        WebhookNotifier::new(client.clone(), config.webhook_url.clone()),
        config.price_freshness_secs,
        config.retention_days,
    ));

    info!(
        sources = ?service.sources(),
        min_profit_rate = config.min_profit_rate,
        "🚀 skinarb starting"
    );

    if args.once {
        let run_timeout = Duration::from_secs(config.run_timeout_secs);
        match args.source {
            Some(source) => {
                let report = timeout(run_timeout, service.run_collection(source))
                    .await
                    .context("collection pass timed out")?;
                info!(%source, success = report.success, failure = report.failure, "done");
            }
            None => {
                timeout(run_timeout, service.run_collection_all())
                    .await
                    .context("collection run timed out")?;
                let found = timeout(run_timeout, service.run_analysis())
                    .await
                    .context("analysis pass timed out")??;
                info!(opportunities = found, "done");
            }
        }
        return Ok(());
    }

    let run_timeout = Duration::from_secs(config.run_timeout_secs);
    let mut tasks = Vec::new();

    for source in service.sources() {
        if let Some(filter) = args.source {
            if source != filter {
                continue;
            }
        }
        let service = Arc::clone(&service);
        let every = Duration::from_secs(config.source(source).interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if timeout(run_timeout, service.run_collection(source))
                    .await
                    .is_err()
                {
                    warn!(%source, "collection pass exceeded run timeout, abandoned");
                }
            }
        }));
    }

    {
        let service = Arc::clone(&service);
        let every = Duration::from_secs(config.analysis_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match timeout(run_timeout, service.run_analysis()).await {
                    Ok(Ok(found)) => info!(opportunities = found, "analysis pass done"),
                    Ok(Err(e)) => error!(error = %e, "analysis pass failed"),
                    Err(_) => warn!("analysis pass exceeded run timeout, abandoned"),
                }
            }
        }));
    }

    {
        let service = Arc::clone(&service);
        let every = Duration::from_secs(config.cleanup_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so startup isn't a
            // purge.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = service.run_cleanup().await {
                    error!(error = %e, "cleanup pass failed");
                }
            }
        }));
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    for task in tasks {
        task.abort();
    }
    Ok(())
}
