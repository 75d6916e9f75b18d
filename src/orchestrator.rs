//! Fan-out collection across sources and items.
//!
//! One pass per source: a discovery call, then concurrent detail fetches
//! for up to the per-run item cap. Failures are counted, never propagated —
//! one bad item must not sink its source and one bad source must not sink
//! the run.

use crate::collectors::SourceAdapter;
use crate::models::{CollectionReport, SourceReport};
use crate::storage::MarketDb;
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct CollectionOrchestrator {
    db: MarketDb,
    /// Item cap per source per pass; discovery pages can be larger.
    max_items_per_run: usize,
}

impl CollectionOrchestrator {
    pub fn new(db: MarketDb, max_items_per_run: usize) -> Self {
        Self {
            db,
            max_items_per_run,
        }
    }

    /// One collection pass for a single source. Always returns a report;
    /// a failed discovery call yields a `listing_failed` report with zero
    /// counts.
    pub async fn run_source(&self, adapter: &dyn SourceAdapter) -> SourceReport {
        let source = adapter.source();

        let mut handles = match adapter.list_candidate_items().await {
            Ok(handles) => handles,
            Err(e) => {
                error!(%source, error = %e, "discovery failed, skipping source this pass");
                return SourceReport {
                    listing_failed: true,
                    ..Default::default()
                };
            }
        };
        handles.truncate(self.max_items_per_run);
        info!(%source, items = handles.len(), "collecting");

        let fetches = handles
            .iter()
            .map(|handle| adapter.fetch_item_detail(handle));
        let results = join_all(fetches).await;

        let mut report = SourceReport::default();
        let now = Utc::now();
        for (handle, result) in handles.iter().zip(results) {
            let item = match result {
                Ok(Some(item)) => item,
                // Absent data counts as a failure for the report, but the
                // pass keeps going.
                Ok(None) => {
                    report.failure += 1;
                    continue;
                }
                Err(e) => {
                    warn!(%source, item = %handle.market_key, error = %e, "item fetch failed");
                    report.failure += 1;
                    continue;
                }
            };

            let persisted = self
                .db
                .upsert_item(&item.catalog, now)
                .and_then(|_| self.db.append_price_record(&item.listing));
            match persisted {
                Ok(()) => report.success += 1,
                Err(e) => {
                    warn!(%source, item = %handle.market_key, error = %e, "persist failed");
                    report.failure += 1;
                }
            }
        }

        info!(
            %source,
            success = report.success,
            failure = report.failure,
            "collection pass done"
        );
        report
    }

    /// Run every adapter concurrently and aggregate the per-source reports.
    pub async fn run_all(&self, adapters: &[Arc<dyn SourceAdapter>]) -> CollectionReport {
        let passes = adapters.iter().map(|adapter| async {
            (adapter.source(), self.run_source(adapter.as_ref()).await)
        });
        CollectionReport {
            per_source: join_all(passes).await,
        }
    }
}
