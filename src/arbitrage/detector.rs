//! Pure spread scan over a price snapshot.
//!
//! No I/O and no clock reads: the caller supplies both the snapshot and the
//! detection timestamp, so the same inputs always produce the same output.

use crate::models::{ArbitrageOpportunity, Source};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub const DEFAULT_MIN_PROFIT_RATE: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct ArbitrageDetector {
    /// Minimum profit rate in percent; spreads at or below this are noise.
    min_profit_rate: f64,
}

impl Default for ArbitrageDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PROFIT_RATE)
    }
}

impl ArbitrageDetector {
    pub fn new(min_profit_rate: f64) -> Self {
        Self { min_profit_rate }
    }

    /// Scan every item's per-source prices for a buy-low/sell-high spread.
    ///
    /// Items quoted on fewer than two sources are skipped. Ties go to the
    /// earlier source in [`Source`] declaration order, which the snapshot's
    /// `BTreeMap` keying makes automatic. Output is sorted by item key.
    pub fn detect(
        &self,
        snapshot: &HashMap<String, BTreeMap<Source, f64>>,
        detected_at: DateTime<Utc>,
    ) -> Vec<ArbitrageOpportunity> {
        let mut opportunities: Vec<ArbitrageOpportunity> = snapshot
            .iter()
            .filter_map(|(market_key, prices)| {
                self.scan_item(market_key, prices, detected_at)
            })
            .collect();
        opportunities.sort_by(|a, b| a.market_key.cmp(&b.market_key));
        opportunities
    }

    fn scan_item(
        &self,
        market_key: &str,
        prices: &BTreeMap<Source, f64>,
        detected_at: DateTime<Utc>,
    ) -> Option<ArbitrageOpportunity> {
        if prices.len() < 2 {
            return None;
        }

        let mut buy: Option<(Source, f64)> = None;
        let mut sell: Option<(Source, f64)> = None;
        for (&source, &price) in prices {
            if price <= 0.0 || !price.is_finite() {
                debug!(market_key, %source, price, "ignoring unusable quote");
                continue;
            }
            // Strict comparisons keep the first source seen on equal prices.
            if buy.map_or(true, |(_, p)| price < p) {
                buy = Some((source, price));
            }
            if sell.map_or(true, |(_, p)| price > p) {
                sell = Some((source, price));
            }
        }

        let (buy_source, buy_price) = buy?;
        let (sell_source, sell_price) = sell?;
        if buy_source == sell_source {
            return None;
        }

        let profit_rate = (sell_price - buy_price) / buy_price * 100.0;
        if profit_rate <= self.min_profit_rate {
            return None;
        }

        Some(ArbitrageOpportunity {
            market_key: market_key.to_string(),
            buy_source,
            buy_price,
            sell_source,
            sell_price,
            profit_rate,
            detected_at,
        })
    }
}
