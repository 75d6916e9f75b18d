//! End-to-end pipeline flow against an in-memory database: collect from
//! three scripted sources, analyze, read back opportunities, clean up.

use async_trait::async_trait;
use chrono::Utc;
use skinarb::arbitrage::ArbitrageDetector;
use skinarb::collectors::SourceAdapter;
use skinarb::error::CollectError;
use skinarb::models::{
    CollectedItem, ItemCatalogEntry, ItemHandle, ListingRecord, Source,
};
use skinarb::notify::WebhookNotifier;
use skinarb::orchestrator::CollectionOrchestrator;
use skinarb::pipeline::PipelineService;
use skinarb::storage::MarketDb;
use std::sync::Arc;
use std::time::Duration;

struct FixedPriceAdapter {
    source: Source,
    prices: Vec<(&'static str, f64)>,
    fail_listing: bool,
}

#[async_trait]
impl SourceAdapter for FixedPriceAdapter {
    fn source(&self) -> Source {
        self.source
    }

    async fn list_candidate_items(&self) -> Result<Vec<ItemHandle>, CollectError> {
        if self.fail_listing {
            return Err(CollectError::Transport("connection refused".to_string()));
        }
        Ok(self
            .prices
            .iter()
            .map(|(key, _)| ItemHandle {
                market_key: key.to_string(),
                display_name: key.to_string(),
                ..Default::default()
            })
            .collect())
    }

    async fn fetch_item_detail(
        &self,
        handle: &ItemHandle,
    ) -> Result<Option<CollectedItem>, CollectError> {
        let Some((_, price)) = self
            .prices
            .iter()
            .find(|(key, _)| *key == handle.market_key)
        else {
            return Ok(None);
        };
        Ok(Some(CollectedItem {
            catalog: ItemCatalogEntry {
                market_key: handle.market_key.clone(),
                display_name: handle.display_name.clone(),
                category: "Rifle".to_string(),
                ..Default::default()
            },
            listing: ListingRecord {
                market_key: handle.market_key.clone(),
                source: self.source,
                price: *price,
                secondary_price: None,
                volume: 5,
                observed_at: Utc::now(),
            },
        }))
    }
}

fn service_with(
    db: MarketDb,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    min_profit_rate: f64,
) -> PipelineService {
    PipelineService::new(
        db.clone(),
        adapters,
        CollectionOrchestrator::new(db, 100),
        ArbitrageDetector::new(min_profit_rate),
        WebhookNotifier::new(reqwest::Client::new(), None),
        21_600,
        90,
    )
}

#[tokio::test]
async fn collect_analyze_and_clean_up() {
    let db = MarketDb::open_in_memory().unwrap();
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(FixedPriceAdapter {
            source: Source::Steam,
            prices: vec![("AK-47 | Redline (Field-Tested)", 100.0), ("quiet item", 50.0)],
            fail_listing: false,
        }),
        Arc::new(FixedPriceAdapter {
            source: Source::Buff,
            prices: vec![("AK-47 | Redline (Field-Tested)", 80.0), ("quiet item", 50.5)],
            fail_listing: false,
        }),
        Arc::new(FixedPriceAdapter {
            source: Source::Youpin,
            prices: vec![("AK-47 | Redline (Field-Tested)", 130.0)],
            fail_listing: false,
        }),
    ];
    let service = service_with(db.clone(), adapters, 5.0);

    let report = service.run_collection_all().await;
    assert_eq!(report.total_success(), 5);
    assert_eq!(report.total_failure(), 0);
    assert_eq!(db.get_active_items().unwrap().len(), 2);

    let found = service.run_analysis().await.unwrap();
    assert_eq!(found, 1);

    let opps = db.recent_opportunities(10).unwrap();
    assert_eq!(opps.len(), 1);
    let opp = &opps[0];
    assert_eq!(opp.market_key, "AK-47 | Redline (Field-Tested)");
    assert_eq!(opp.buy_source, Source::Buff);
    assert_eq!(opp.buy_price, 80.0);
    assert_eq!(opp.sell_source, Source::Youpin);
    assert_eq!(opp.sell_price, 130.0);
    assert!((opp.profit_rate - 62.5).abs() < 1e-9);

    // "quiet item" spread is 1% and stays out of the opportunity table.
    assert!(opps.iter().all(|o| o.market_key != "quiet item"));

    // Market summary reflects what was collected.
    let stats = db
        .market_stats(Utc::now() - chrono::Duration::hours(6))
        .unwrap();
    assert_eq!(stats.total_items, 2);
    assert_eq!(stats.quoted_items, 2);
    assert_eq!(stats.quote_count, 5);
    assert!(stats.median_price.is_some());

    // Rolling averages are populated by the analysis pass.
    let (avg7, avg30) = db.rolling_averages("AK-47 | Redline (Field-Tested)").unwrap();
    assert!(avg7.is_some());
    assert_eq!(avg7, avg30);

    // Nothing is old enough to purge.
    assert_eq!(service.run_cleanup().await.unwrap(), 0);
    assert_eq!(db.recent_opportunities(10).unwrap().len(), 1);
}

#[tokio::test]
async fn broken_source_leaves_other_sources_and_analysis_intact() {
    let db = MarketDb::open_in_memory().unwrap();
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(FixedPriceAdapter {
            source: Source::Steam,
            prices: vec![("ak", 100.0)],
            fail_listing: false,
        }),
        Arc::new(FixedPriceAdapter {
            source: Source::Buff,
            prices: vec![],
            fail_listing: true,
        }),
        Arc::new(FixedPriceAdapter {
            source: Source::Youpin,
            prices: vec![("ak", 130.0)],
            fail_listing: false,
        }),
    ];
    let service = service_with(db.clone(), adapters, 5.0);

    let report = service.run_collection_all().await;
    assert!(report.get(Source::Buff).unwrap().listing_failed);
    assert_eq!(report.total_success(), 2);

    let found = service.run_analysis().await.unwrap();
    assert_eq!(found, 1);
    let opp = &db.recent_opportunities(1).unwrap()[0];
    assert_eq!(opp.buy_source, Source::Steam);
    assert_eq!(opp.sell_source, Source::Youpin);
}

#[tokio::test]
async fn repeated_collection_keeps_history_append_only() {
    let db = MarketDb::open_in_memory().unwrap();
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixedPriceAdapter {
        source: Source::Steam,
        prices: vec![("ak", 100.0)],
        fail_listing: false,
    })];
    let service = service_with(db.clone(), adapters, 5.0);

    service.run_collection_all().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    service.run_collection_all().await;

    // Still one catalog row, but the snapshot picks the newer observation.
    assert_eq!(db.get_active_items().unwrap().len(), 1);
    let snapshot = db
        .latest_price_snapshot(Utc::now() - chrono::Duration::hours(1))
        .unwrap();
    assert_eq!(snapshot["ak"][&Source::Steam], 100.0);
}
