//! Steam Community Market adapter.
//!
//! Discovery goes through `/market/search/render/` (popularity sort,
//! `norender=1` for JSON), details through `/market/priceoverview/`.
//! Steam decorates prices with currency symbols and thousands separators
//! and reports volume as a comma-grouped string, so everything is parsed
//! defensively. Catalog attributes come from the free-text
//! `asset_description.type` field by keyword matching.

use crate::error::CollectError;
use crate::models::{CollectedItem, ItemCatalogEntry, ItemHandle, ListingRecord, Source};
use crate::net::RetryingFetcher;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::{parse_decimal, SourceAdapter};

const STEAM_MARKET_BASE: &str = "https://steamcommunity.com/market";
/// CS2.
const APP_ID: u32 = 730;
/// CNY, matching the other sources' currency.
const CURRENCY: u32 = 23;
const SEARCH_PAGE_SIZE: u32 = 100;

pub struct SteamAdapter {
    fetcher: RetryingFetcher,
    base_url: String,
}

impl SteamAdapter {
    pub fn new(fetcher: RetryingFetcher) -> Self {
        Self::with_base_url(fetcher, STEAM_MARKET_BASE.to_string())
    }

    pub fn with_base_url(fetcher: RetryingFetcher, base_url: String) -> Self {
        Self { fetcher, base_url }
    }
}

#[async_trait]
impl SourceAdapter for SteamAdapter {
    fn source(&self) -> Source {
        Source::Steam
    }

    async fn list_candidate_items(&self) -> Result<Vec<ItemHandle>, CollectError> {
        let url = format!("{}/search/render/", self.base_url);
        let params = [
            ("query", String::new()),
            ("start", "0".to_string()),
            ("count", SEARCH_PAGE_SIZE.to_string()),
            ("search_descriptions", "0".to_string()),
            ("sort_column", "popular".to_string()),
            ("sort_dir", "desc".to_string()),
            ("appid", APP_ID.to_string()),
            ("norender", "1".to_string()),
        ];

        let body: SearchResponse = serde_json::from_value(
            self.fetcher.fetch_json(&url, &params, &[]).await?,
        )
        .map_err(|e| CollectError::UpstreamShape(e.to_string()))?;

        if !body.success {
            return Err(CollectError::UpstreamShape(
                "search/render returned success=false".to_string(),
            ));
        }

        let handles = body
            .results
            .into_iter()
            .filter(|r| !r.hash_name.is_empty())
            .map(|r| {
                let type_text = r.asset_description.item_type;
                ItemHandle {
                    market_key: r.hash_name.clone(),
                    display_name: if r.name.is_empty() { r.hash_name } else { r.name },
                    native_id: None,
                    category: extract_category(&type_text),
                    rarity: extract_rarity(&type_text),
                    wear: extract_wear(&type_text),
                    icon_url: r.asset_description.icon_url,
                }
            })
            .collect();

        Ok(handles)
    }

    async fn fetch_item_detail(
        &self,
        handle: &ItemHandle,
    ) -> Result<Option<CollectedItem>, CollectError> {
        let url = format!("{}/priceoverview/", self.base_url);
        let params = [
            ("appid", APP_ID.to_string()),
            ("currency", CURRENCY.to_string()),
            ("market_hash_name", handle.market_key.clone()),
        ];

        let body: PriceOverview = serde_json::from_value(
            self.fetcher.fetch_json(&url, &params, &[]).await?,
        )
        .map_err(|e| CollectError::UpstreamShape(e.to_string()))?;

        if !body.success {
            debug!(item = %handle.market_key, "priceoverview returned success=false");
            return Ok(None);
        }

        // A success payload without a usable lowest price means no current
        // listings; the item is absent for this run.
        let Some(price) = body.lowest_price.as_deref().and_then(parse_decimal) else {
            debug!(item = %handle.market_key, "no usable lowest_price, dropping");
            return Ok(None);
        };

        let secondary_price = body.median_price.as_deref().and_then(parse_decimal);
        let volume = body
            .volume
            .as_deref()
            .map(|v| v.replace(',', ""))
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0);

        Ok(Some(CollectedItem {
            catalog: ItemCatalogEntry {
                market_key: handle.market_key.clone(),
                display_name: handle.display_name.clone(),
                category: handle.category.clone(),
                rarity: handle.rarity.clone(),
                wear: handle.wear.clone(),
                icon_url: handle.icon_url.clone(),
            },
            listing: ListingRecord {
                market_key: handle.market_key.clone(),
                source: Source::Steam,
                price,
                secondary_price,
                volume,
                observed_at: Utc::now(),
            },
        }))
    }
}

// --- response shapes -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    hash_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    asset_description: AssetDescription,
}

#[derive(Debug, Default, Deserialize)]
struct AssetDescription {
    #[serde(default, rename = "type")]
    item_type: String,
    #[serde(default)]
    icon_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    lowest_price: Option<String>,
    #[serde(default)]
    median_price: Option<String>,
    #[serde(default)]
    volume: Option<String>,
}

// --- free-text attribute extraction ----------------------------------------

const CATEGORIES: [&str; 17] = [
    "Sniper Rifle",
    "Machine Gun",
    "Music Kit",
    "Rifle",
    "Pistol",
    "Knife",
    "Gloves",
    "SMG",
    "Shotgun",
    "Sticker",
    "Graffiti",
    "Case",
    "Key",
    "Pass",
    "Pin",
    "Agent",
    "Patch",
];

const RARITIES: [&str; 7] = [
    "Contraband",
    "Covert",
    "Classified",
    "Restricted",
    "Mil-Spec",
    "Industrial Grade",
    "Consumer Grade",
];

const WEARS: [&str; 5] = [
    "Factory New",
    "Minimal Wear",
    "Field-Tested",
    "Well-Worn",
    "Battle-Scarred",
];

fn match_keyword(text: &str, keywords: &[&str]) -> Option<String> {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .find(|k| lower.contains(&k.to_lowercase()))
        .map(|k| k.to_string())
}

fn extract_category(text: &str) -> String {
    // Multi-word names are listed first so "Sniper Rifle" doesn't match as
    // "Rifle".
    match_keyword(text, &CATEGORIES).unwrap_or_default()
}

fn extract_rarity(text: &str) -> String {
    match_keyword(text, &RARITIES).unwrap_or_default()
}

fn extract_wear(text: &str) -> String {
    match_keyword(text, &WEARS).unwrap_or_default()
}
