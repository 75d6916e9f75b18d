//! Marketplace source adapters.
//!
//! Each adapter turns a [`RetryingFetcher`] into normalized
//! [`CollectedItem`]s: a bounded discovery call followed by one detail
//! fetch per item. Request signing and response-shape parsing are private
//! to each adapter; the orchestrator only sees the trait.

pub mod buff;
pub mod steam;
pub mod youpin;

pub use buff::BuffAdapter;
pub use steam::SteamAdapter;
pub use youpin::YoupinAdapter;

use crate::error::CollectError;
use crate::models::{CollectedItem, ItemHandle, Source};
use async_trait::async_trait;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Bounded discovery call: the current page of candidate items, most
    /// relevant first. The orchestrator truncates to its per-run cap.
    async fn list_candidate_items(&self) -> Result<Vec<ItemHandle>, CollectError>;

    /// One normalized record per handle. Malformed or priceless upstream
    /// data degrades to `Ok(None)`; an `Err` here means the fetch itself
    /// failed after retries. Must never panic on upstream content.
    async fn fetch_item_detail(
        &self,
        handle: &ItemHandle,
    ) -> Result<Option<CollectedItem>, CollectError>;
}

/// Parse a price out of upstream text that may carry currency symbols and
/// locale separators ("¥ 1,234.56", "1.234,56", "123").
///
/// Returns `None` for junk or non-positive values — a zero price on an
/// otherwise successful response means "no data", never a free item.
pub(crate) fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let normalized = match (cleaned.contains('.'), cleaned.contains(',')) {
        // Both present: the rightmost separator is the decimal point.
        (true, true) => {
            if cleaned.rfind('.') > cleaned.rfind(',') {
                cleaned.replace(',', "")
            } else {
                cleaned.replace('.', "").replace(',', ".")
            }
        }
        // Comma only: decimal separator unless it looks like thousands
        // grouping ("1,234").
        (false, true) => {
            let after = cleaned.len() - cleaned.rfind(',').unwrap() - 1;
            if after == 3 && cleaned.matches(',').count() == 1 {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        _ => cleaned,
    };

    let value = normalized.parse::<f64>().ok()?;
    (value > 0.0 && value.is_finite()).then_some(value)
}

/// Pull an f64 out of a JSON field that upstreams serialize inconsistently
/// as either a number or a decimal string.
pub(crate) fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| *v > 0.0),
        serde_json::Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Same, for identifiers that arrive as either a number or a string.
pub(crate) fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
