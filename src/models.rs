//! Core data model shared across the collection pipeline.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One external marketplace data provider.
///
/// Declaration order doubles as the priority order used to break ties in
/// arbitrage detection, so new sources go at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Steam,
    Buff,
    Youpin,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Steam, Source::Buff, Source::Youpin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Steam => "steam",
            Source::Buff => "buff",
            Source::Youpin => "youpin",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steam" => Ok(Source::Steam),
            "buff" => Ok(Source::Buff),
            "youpin" => Ok(Source::Youpin),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// One normalized price observation. Append-only, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Canonical cross-source item identifier (market_hash_name).
    pub market_key: String,
    pub source: Source,
    /// Lowest current listing price, currency-normalized. Always > 0; a
    /// source reporting a zero price is treated as having no data.
    pub price: f64,
    /// Secondary quote where the source provides one (Steam median price,
    /// BUFF highest buy order, YouPin max listing).
    pub secondary_price: Option<f64>,
    /// Listing/sale count. 0 when the source doesn't report it.
    pub volume: i64,
    pub observed_at: DateTime<Utc>,
}

/// Mutable catalog projection of an item, last-writer-wins per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCatalogEntry {
    pub market_key: String,
    pub display_name: String,
    pub category: String,
    pub rarity: String,
    pub wear: String,
    pub icon_url: String,
}

/// A discovered item awaiting a detail fetch. Carries whatever catalog
/// attributes the listing call already yielded so the detail call only has
/// to fill in prices.
#[derive(Debug, Clone, Default)]
pub struct ItemHandle {
    pub market_key: String,
    pub display_name: String,
    /// Source-native identifier where the detail endpoint is keyed by one
    /// (BUFF/YouPin goods id); Steam keys details by market_key directly.
    pub native_id: Option<String>,
    pub category: String,
    pub rarity: String,
    pub wear: String,
    pub icon_url: String,
}

/// Output of one successful item fetch: the catalog projection plus the
/// price observation.
#[derive(Debug, Clone)]
pub struct CollectedItem {
    pub catalog: ItemCatalogEntry,
    pub listing: ListingRecord,
}

/// A detected buy-low/sell-high spread between two sources. Derived data;
/// superseded by the next detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub market_key: String,
    pub buy_source: Source,
    pub buy_price: f64,
    pub sell_source: Source,
    pub sell_price: f64,
    /// (sell - buy) / buy * 100.
    pub profit_rate: f64,
    pub detected_at: DateTime<Utc>,
}

/// Market-wide summary computed by the analysis pass from the freshest
/// quote per (item, source).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MarketStats {
    /// Catalog rows, fresh or not.
    pub total_items: usize,
    /// Items with at least one quote inside the freshness window.
    pub quoted_items: usize,
    /// Fresh quotes across all sources.
    pub quote_count: usize,
    pub median_price: Option<f64>,
}

/// Per-source outcome counts for one collection pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourceReport {
    pub success: usize,
    pub failure: usize,
    /// True when the discovery call itself failed and no items were
    /// attempted.
    pub listing_failed: bool,
}

/// Aggregated outcome of one orchestrator run across all enabled sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    pub per_source: Vec<(Source, SourceReport)>,
}

impl CollectionReport {
    pub fn get(&self, source: Source) -> Option<&SourceReport> {
        self.per_source
            .iter()
            .find(|(s, _)| *s == source)
            .map(|(_, r)| r)
    }

    pub fn total_success(&self) -> usize {
        self.per_source.iter().map(|(_, r)| r.success).sum()
    }

    pub fn total_failure(&self) -> usize {
        self.per_source.iter().map(|(_, r)| r.failure).sum()
    }
}

/// Render a timestamp the way the database stores it: fixed-width RFC3339
/// with microsecond precision, so lexicographic order matches time order.
pub fn db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}
