//! Thin coordination layer the scheduler calls into.
//!
//! Three entry points map to the three recurring jobs: collection,
//! analysis, cleanup. All sequencing lives here; the parts underneath stay
//! independently testable.

use crate::arbitrage::ArbitrageDetector;
use crate::collectors::SourceAdapter;
use crate::models::{CollectionReport, Source, SourceReport};
use crate::notify::WebhookNotifier;
use crate::orchestrator::CollectionOrchestrator;
use crate::storage::MarketDb;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct PipelineService {
    db: MarketDb,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    orchestrator: CollectionOrchestrator,
    detector: ArbitrageDetector,
    notifier: WebhookNotifier,
    price_freshness_secs: u64,
    retention_days: i64,
}

impl PipelineService {
    pub fn new(
        db: MarketDb,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        orchestrator: CollectionOrchestrator,
        detector: ArbitrageDetector,
        notifier: WebhookNotifier,
        price_freshness_secs: u64,
        retention_days: i64,
    ) -> Self {
        Self {
            db,
            adapters,
            orchestrator,
            detector,
            notifier,
            price_freshness_secs,
            retention_days,
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    /// One collection pass for a single source. A source with no adapter
    /// (disabled) is a no-op report.
    pub async fn run_collection(&self, source: Source) -> SourceReport {
        match self.adapters.iter().find(|a| a.source() == source) {
            Some(adapter) => self.orchestrator.run_source(adapter.as_ref()).await,
            None => {
                warn!(%source, "no adapter configured, skipping");
                SourceReport::default()
            }
        }
    }

    /// Collection across every configured source, concurrently.
    pub async fn run_collection_all(&self) -> CollectionReport {
        let report = self.orchestrator.run_all(&self.adapters).await;
        info!(
            success = report.total_success(),
            failure = report.total_failure(),
            "collection run complete"
        );
        report
    }

    /// Analysis pass: refresh rolling averages, scan the fresh snapshot for
    /// spreads, persist and notify. Returns the number of opportunities
    /// persisted; a partial persist is a partial success, not an error.
    pub async fn run_analysis(&self) -> Result<usize> {
        let now = Utc::now();
        let items = self.db.update_rolling_averages(now)?;
        info!(items, "rolling averages refreshed");

        let since = now - ChronoDuration::seconds(self.price_freshness_secs as i64);
        let stats = self.db.market_stats(since)?;
        info!(
            total_items = stats.total_items,
            quoted_items = stats.quoted_items,
            quotes = stats.quote_count,
            median_price = stats.median_price,
            "market summary"
        );

        let snapshot = self.db.latest_price_snapshot(since)?;
        let opportunities = self.detector.detect(&snapshot, now);

        let mut saved = Vec::with_capacity(opportunities.len());
        for opp in opportunities {
            match self.db.save_opportunity(&opp) {
                Ok(()) => {
                    info!(
                        item = %opp.market_key,
                        buy = %opp.buy_source,
                        sell = %opp.sell_source,
                        profit_rate = opp.profit_rate,
                        "💰 arbitrage opportunity"
                    );
                    saved.push(opp);
                }
                Err(e) => warn!(item = %opp.market_key, error = %e, "failed to save opportunity"),
            }
        }

        self.notifier.notify(&saved).await;
        Ok(saved.len())
    }

    /// Drop history older than the retention window.
    pub async fn run_cleanup(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
        let removed = self.db.purge_before(cutoff)?;
        info!(removed, retention_days = self.retention_days, "🧹 cleanup done");
        Ok(removed)
    }
}
