//! BUFF (buff.163.com) adapter.
//!
//! Discovery through `/api/market/goods`, detail through
//! `/api/market/goods/info`. BUFF serializes prices as decimal strings and
//! nests catalog attributes four levels deep under `goods_info.info.tags`;
//! every level is defaulted so a partial payload degrades instead of
//! erroring. An optional session cookie is forwarded on every request.

use crate::error::CollectError;
use crate::models::{CollectedItem, ItemCatalogEntry, ItemHandle, ListingRecord, Source};
use crate::net::RetryingFetcher;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::{parse_decimal, SourceAdapter};

const BUFF_BASE: &str = "https://buff.163.com";
const PAGE_SIZE: u32 = 100;

pub struct BuffAdapter {
    fetcher: RetryingFetcher,
    base_url: String,
    session_cookie: Option<String>,
}

impl BuffAdapter {
    pub fn new(fetcher: RetryingFetcher, session_cookie: Option<String>) -> Self {
        Self::with_base_url(fetcher, BUFF_BASE.to_string(), session_cookie)
    }

    pub fn with_base_url(
        fetcher: RetryingFetcher,
        base_url: String,
        session_cookie: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            base_url,
            session_cookie,
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Referer", self.base_url.clone())];
        if let Some(cookie) = &self.session_cookie {
            headers.push(("Cookie", cookie.clone()));
        }
        headers
    }
}

#[async_trait]
impl SourceAdapter for BuffAdapter {
    fn source(&self) -> Source {
        Source::Buff
    }

    async fn list_candidate_items(&self) -> Result<Vec<ItemHandle>, CollectError> {
        let url = format!("{}/api/market/goods", self.base_url);
        let params = [
            ("game", "csgo".to_string()),
            ("page_num", "1".to_string()),
            ("page_size", PAGE_SIZE.to_string()),
            ("sort_by", "price.desc".to_string()),
        ];

        let body: GoodsListResponse = serde_json::from_value(
            self.fetcher.fetch_json(&url, &params, &self.headers()).await?,
        )
        .map_err(|e| CollectError::UpstreamShape(e.to_string()))?;

        if body.code != "OK" {
            return Err(CollectError::UpstreamShape(format!(
                "goods list returned code {}",
                body.code
            )));
        }

        let handles = body
            .data
            .items
            .into_iter()
            .filter(|i| i.id > 0 && !i.market_hash_name.is_empty())
            .map(|i| {
                let tags = i.goods_info.info.tags;
                ItemHandle {
                    market_key: i.market_hash_name,
                    display_name: i.name,
                    native_id: Some(i.id.to_string()),
                    category: tags.item_type.localized_name,
                    rarity: tags.rarity.localized_name,
                    wear: tags.exterior.localized_name,
                    icon_url: i.goods_info.icon_url,
                }
            })
            .collect();

        Ok(handles)
    }

    async fn fetch_item_detail(
        &self,
        handle: &ItemHandle,
    ) -> Result<Option<CollectedItem>, CollectError> {
        let Some(goods_id) = handle.native_id.as_deref() else {
            debug!(item = %handle.market_key, "handle without goods id, dropping");
            return Ok(None);
        };

        let url = format!("{}/api/market/goods/info", self.base_url);
        let params = [
            ("game", "csgo".to_string()),
            ("goods_id", goods_id.to_string()),
        ];

        let body: GoodsDetailResponse = serde_json::from_value(
            self.fetcher.fetch_json(&url, &params, &self.headers()).await?,
        )
        .map_err(|e| CollectError::UpstreamShape(e.to_string()))?;

        if body.code != "OK" {
            debug!(item = %handle.market_key, code = %body.code, "goods detail rejected");
            return Ok(None);
        }

        let Some(price) = parse_decimal(&body.data.sell_min_price) else {
            debug!(item = %handle.market_key, "no usable sell_min_price, dropping");
            return Ok(None);
        };

        // Highest standing buy order is the secondary quote.
        let secondary_price = parse_decimal(&body.data.buy_max_price);
        let volume = body.data.sell_num.max(0);

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
                source: Source::Buff,
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
struct GoodsListResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    data: GoodsListData,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsListData {
    #[serde(default)]
    items: Vec<GoodsListItem>,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsListItem {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    market_hash_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    goods_info: GoodsInfo,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsInfo {
    #[serde(default)]
    icon_url: String,
    #[serde(default)]
    info: GoodsInfoInner,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsInfoInner {
    #[serde(default)]
    tags: GoodsTags,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsTags {
    #[serde(default, rename = "type")]
    item_type: TagValue,
    #[serde(default)]
    rarity: TagValue,
    #[serde(default)]
    exterior: TagValue,
}

#[derive(Debug, Default, Deserialize)]
struct TagValue {
    #[serde(default)]
    localized_name: String,
}

#[derive(Debug, Deserialize)]
struct GoodsDetailResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    data: GoodsDetail,
}

#[derive(Debug, Default, Deserialize)]
struct GoodsDetail {
    #[serde(default)]
    sell_min_price: String,
    #[serde(default)]
    buy_max_price: String,
    #[serde(default)]
    sell_num: i64,
}
