//! Environment-driven configuration.
//!
//! Everything has a sane default except credentials: a source that needs a
//! credential and is enabled without one fails at startup, not mid-run.

use crate::models::Source;
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Per-source collection settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub enabled: bool,
    pub requests_per_minute: f64,
    /// Token bucket burst capacity.
    pub burst: f64,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    /// Seconds between collection passes.
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub steam: SourceConfig,
    pub buff: SourceConfig,
    pub youpin: SourceConfig,
    /// Detail-fetch cap per source per pass.
    pub max_items_per_run: usize,
    /// Percent threshold an opportunity must exceed.
    pub min_profit_rate: f64,
    /// Only observations this recent enter the detection snapshot.
    pub price_freshness_secs: u64,
    pub analysis_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub retention_days: i64,
    /// Hard wall-clock ceiling on a single collection or analysis pass.
    pub run_timeout_secs: u64,
    pub buff_session_cookie: Option<String>,
    pub youpin_api_key: Option<String>,
    pub youpin_api_secret: Option<String>,
    pub webhook_url: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn source_config(source: Source, default_rpm: f64, default_interval: u64) -> SourceConfig {
    let prefix = source.as_str().to_uppercase();
    SourceConfig {
        enabled: env_parse(&format!("{prefix}_ENABLED"), true),
        requests_per_minute: env_parse(&format!("{prefix}_REQUESTS_PER_MINUTE"), default_rpm),
        burst: env_parse(&format!("{prefix}_BURST"), 5.0),
        max_attempts: env_parse(&format!("{prefix}_MAX_ATTEMPTS"), 3),
        request_timeout: Duration::from_secs(env_parse(
            &format!("{prefix}_REQUEST_TIMEOUT_SECS"),
            30,
        )),
        backoff_base: Duration::from_secs(env_parse(&format!("{prefix}_BACKOFF_SECS"), 5)),
        interval_secs: env_parse(&format!("{prefix}_INTERVAL_SECS"), default_interval),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "market.db".to_string()),
            // Steam tolerates the least traffic, so it runs most often but
            // slowest.
            steam: source_config(Source::Steam, 20.0, 300),
            buff: source_config(Source::Buff, 30.0, 600),
            youpin: source_config(Source::Youpin, 30.0, 900),
            max_items_per_run: env_parse("MAX_ITEMS_PER_RUN", 100),
            min_profit_rate: env_parse("MIN_PROFIT_RATE", 5.0),
            price_freshness_secs: env_parse("PRICE_FRESHNESS_SECS", 21_600),
            analysis_interval_secs: env_parse("ANALYSIS_INTERVAL_SECS", 3_600),
            cleanup_interval_secs: env_parse("CLEANUP_INTERVAL_SECS", 86_400),
            retention_days: env_parse("RETENTION_DAYS", 90),
            run_timeout_secs: env_parse("RUN_TIMEOUT_SECS", 240),
            buff_session_cookie: env_opt("BUFF_SESSION_COOKIE"),
            youpin_api_key: env_opt("YOUPIN_API_KEY"),
            youpin_api_secret: env_opt("YOUPIN_API_SECRET"),
            webhook_url: env_opt("WEBHOOK_URL"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.min_profit_rate < 0.0 {
            anyhow::bail!("MIN_PROFIT_RATE must be non-negative");
        }
        if self.retention_days <= 0 {
            anyhow::bail!("RETENTION_DAYS must be positive");
        }
        if self.youpin.enabled {
            self.youpin_api_key
                .as_ref()
                .context("YOUPIN_API_KEY required while youpin is enabled")?;
            self.youpin_api_secret
                .as_ref()
                .context("YOUPIN_API_SECRET required while youpin is enabled")?;
        }
        Ok(())
    }

    pub fn source(&self, source: Source) -> &SourceConfig {
        match source {
            Source::Steam => &self.steam,
            Source::Buff => &self.buff,
            Source::Youpin => &self.youpin,
        }
    }
}
