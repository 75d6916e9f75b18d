//! YouPin (youpin898) adapter.
//!
//! Every request carries a millisecond timestamp and an HMAC-SHA256
//! signature over the canonically-sorted query string, keyed by the shared
//! API secret. Responses use `code == 0` envelopes with payloads whose
//! field types drift between number and string, so parsing goes through
//! `serde_json::Value` with the shared coercion helpers.

use crate::error::CollectError;
use crate::models::{CollectedItem, ItemCatalogEntry, ItemHandle, ListingRecord, Source};
use crate::net::RetryingFetcher;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use super::{json_f64, json_id, SourceAdapter};

type HmacSha256 = Hmac<Sha256>;

const YOUPIN_BASE: &str = "https://www.youpin898.com";
/// CS2.
const GAME_ID: u32 = 730;
const PAGE_SIZE: u32 = 100;

pub struct YoupinAdapter {
    fetcher: RetryingFetcher,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl YoupinAdapter {
    pub fn new(
        fetcher: RetryingFetcher,
        api_key: String,
        api_secret: String,
    ) -> Result<Self, CollectError> {
        Self::with_base_url(fetcher, YOUPIN_BASE.to_string(), api_key, api_secret)
    }

    pub fn with_base_url(
        fetcher: RetryingFetcher,
        base_url: String,
        api_key: String,
        api_secret: String,
    ) -> Result<Self, CollectError> {
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(CollectError::Configuration(
                "youpin enabled but YOUPIN_API_KEY / YOUPIN_API_SECRET not set".to_string(),
            ));
        }
        Ok(Self {
            fetcher,
            base_url,
            api_key,
            api_secret,
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-API-Key", self.api_key.clone()),
            ("Referer", self.base_url.clone()),
        ]
    }

    /// Append the millisecond timestamp and the signature the API expects.
    fn signed(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let sign = sign_params(&params, &self.api_secret);
        params.push(("sign", sign));
        params
    }

    async fn get_enveloped(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, CollectError> {
        let body = self.fetcher.fetch_json(url, params, &self.headers()).await?;
        let code = body.get("code").and_then(|c| c.as_i64());
        if code != Some(0) {
            return Err(CollectError::UpstreamShape(format!(
                "youpin envelope code {:?} at {}",
                code, url
            )));
        }
        Ok(body.get("data").cloned().unwrap_or(serde_json::Value::Null))
    }
}

/// Deterministic canonical-parameter-order digest: sort by key, join as
/// `k=v&…`, HMAC-SHA256 with the shared secret, uppercase hex.
fn sign_params(params: &[(&'static str, String)], secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    let payload = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    // A zero-length key is rejected by HMAC; constructors guarantee the
    // secret is non-empty.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any non-empty key length");
    mac.update(payload.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}

#[async_trait]
impl SourceAdapter for YoupinAdapter {
    fn source(&self) -> Source {
        Source::Youpin
    }

    async fn list_candidate_items(&self) -> Result<Vec<ItemHandle>, CollectError> {
        let url = format!("{}/api/v2/goods/list", self.base_url);
        let params = self.signed(vec![
            ("game_id", GAME_ID.to_string()),
            ("page", "1".to_string()),
            ("page_size", PAGE_SIZE.to_string()),
            ("sort_type", "price_desc".to_string()),
        ]);

        let data = self.get_enveloped(&url, &params).await?;
        let rows = data
            .get("list")
            .and_then(|l| l.as_array())
            .cloned()
            .unwrap_or_default();

        let handles = rows
            .iter()
            .filter_map(|row| {
                let market_key = row.get("market_hash_name")?.as_str()?.to_string();
                if market_key.is_empty() {
                    return None;
                }
                let native_id = row.get("goods_id").and_then(json_id)?;
                let text = |field: &str| {
                    row.get(field)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                Some(ItemHandle {
                    display_name: {
                        let name = text("name");
                        if name.is_empty() { market_key.clone() } else { name }
                    },
                    market_key,
                    native_id: Some(native_id),
                    category: text("type"),
                    rarity: text("rarity"),
                    wear: text("quality"),
                    icon_url: text("icon_url"),
                })
            })
            .collect();

        Ok(handles)
    }

    async fn fetch_item_detail(
        &self,
        handle: &ItemHandle,
    ) -> Result<Option<CollectedItem>, CollectError> {
        let Some(goods_id) = handle.native_id.clone() else {
            debug!(item = %handle.market_key, "handle without goods id, dropping");
            return Ok(None);
        };

        let url = format!("{}/api/v2/goods/detail", self.base_url);
        let params = self.signed(vec![
            ("goods_id", goods_id),
            ("game_id", GAME_ID.to_string()),
        ]);

        let data = match self.get_enveloped(&url, &params).await {
            Ok(data) => data,
            // A rejected envelope on one item is that item's problem only.
            Err(CollectError::UpstreamShape(reason)) => {
                debug!(item = %handle.market_key, reason, "detail envelope rejected");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(price) = data.get("min_price").and_then(json_f64) else {
            debug!(item = %handle.market_key, "no usable min_price, dropping");
            return Ok(None);
        };

        let secondary_price = data.get("max_price").and_then(json_f64);
        let volume = data
            .get("sell_count")
            .and_then(|v| v.as_i64())
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
                source: Source::Youpin,
                price,
                secondary_price,
                volume,
                observed_at: Utc::now(),
            },
        }))
    }
}
