//! SQLite persistence for the price pipeline.
//!
//! Three tables: `items` is the mutable catalog (last writer wins per
//! market_key), `price_history` is append-only observations, and
//! `opportunities` holds detection output. Timestamps are stored as
//! fixed-width RFC3339 text with microsecond precision so TEXT comparison
//! is chronological comparison.

use crate::models::{
    db_timestamp, ArbitrageOpportunity, ItemCatalogEntry, ListingRecord, MarketStats, Source,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared handle to the market database. Cheap to clone; all access goes
/// through a single connection guarded by a mutex, which is plenty for a
/// write load of a few hundred rows per collection pass.
#[derive(Clone)]
pub struct MarketDb {
    conn: Arc<Mutex<Connection>>,
}

impl MarketDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening database at {}", path.as_ref().display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        info!("📊 market database ready at {}", path.as_ref().display());
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                market_key    TEXT PRIMARY KEY,
                display_name  TEXT NOT NULL,
                category      TEXT NOT NULL DEFAULT '',
                rarity        TEXT NOT NULL DEFAULT '',
                wear          TEXT NOT NULL DEFAULT '',
                icon_url      TEXT NOT NULL DEFAULT '',
                avg_price_7d  REAL,
                avg_price_30d REAL,
                last_updated  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS price_history (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                market_key      TEXT NOT NULL,
                source          TEXT NOT NULL,
                price           REAL NOT NULL,
                secondary_price REAL,
                volume          INTEGER NOT NULL DEFAULT 0,
                recorded_at     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_price_history_item
                ON price_history(market_key, source, recorded_at);
            CREATE INDEX IF NOT EXISTS idx_price_history_recorded
                ON price_history(recorded_at);

            CREATE TABLE IF NOT EXISTS opportunities (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                market_key  TEXT NOT NULL,
                buy_source  TEXT NOT NULL,
                buy_price   REAL NOT NULL,
                sell_source TEXT NOT NULL,
                sell_price  REAL NOT NULL,
                profit_rate REAL NOT NULL,
                detected_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_opportunities_detected
                ON opportunities(detected_at);
            "#,
        )
        .context("creating schema")?;
        Ok(())
    }

    /// Insert or refresh the catalog row for an item. Rolling averages are
    /// left untouched; only the analysis pass writes those.
    pub fn upsert_item(&self, item: &ItemCatalogEntry, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO items (market_key, display_name, category, rarity, wear, icon_url, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(market_key) DO UPDATE SET
                display_name = excluded.display_name,
                category     = excluded.category,
                rarity       = excluded.rarity,
                wear         = excluded.wear,
                icon_url     = excluded.icon_url,
                last_updated = excluded.last_updated
            "#,
        )?;
        stmt.execute(params![
            item.market_key,
            item.display_name,
            item.category,
            item.rarity,
            item.wear,
            item.icon_url,
            db_timestamp(now),
        ])?;
        Ok(())
    }

    /// Append one price observation. Never updates existing rows.
    pub fn append_price_record(&self, record: &ListingRecord) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO price_history (market_key, source, price, secondary_price, volume, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        stmt.execute(params![
            record.market_key,
            record.source.as_str(),
            record.price,
            record.secondary_price,
            record.volume,
            db_timestamp(record.observed_at),
        ])?;
        Ok(())
    }

    /// The latest observation per (item, source) pair recorded at or after
    /// `since`, keyed for the detector. Stale sources simply don't appear.
    pub fn latest_price_snapshot(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, BTreeMap<Source, f64>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT market_key, source, price FROM price_history
            WHERE id IN (
                SELECT MAX(id) FROM price_history
                WHERE recorded_at >= ?1
                GROUP BY market_key, source
            )
            "#,
        )?;
        let rows = stmt.query_map(params![db_timestamp(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut snapshot: HashMap<String, BTreeMap<Source, f64>> = HashMap::new();
        for row in rows {
            let (market_key, source, price) = row?;
            // Rows written by an older build with a source this build no
            // longer knows are skipped, not fatal.
            let Ok(source) = source.parse::<Source>() else {
                debug!(source, "skipping price row with unknown source");
                continue;
            };
            snapshot.entry(market_key).or_default().insert(source, price);
        }
        Ok(snapshot)
    }

    /// Latest price per source for a single item, freshness-filtered.
    pub fn latest_prices_for_item(
        &self,
        market_key: &str,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<Source, f64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT source, price FROM price_history
            WHERE market_key = ?1 AND id IN (
                SELECT MAX(id) FROM price_history
                WHERE market_key = ?1 AND recorded_at >= ?2
                GROUP BY source
            )
            "#,
        )?;
        let rows = stmt.query_map(params![market_key, db_timestamp(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut prices = BTreeMap::new();
        for row in rows {
            let (source, price) = row?;
            if let Ok(source) = source.parse::<Source>() {
                prices.insert(source, price);
            }
        }
        Ok(prices)
    }

    /// All catalog entries, most recently updated first.
    pub fn get_active_items(&self) -> Result<Vec<ItemCatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT market_key, display_name, category, rarity, wear, icon_url
            FROM items ORDER BY last_updated DESC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ItemCatalogEntry {
                market_key: row.get(0)?,
                display_name: row.get(1)?,
                category: row.get(2)?,
                rarity: row.get(3)?,
                wear: row.get(4)?,
                icon_url: row.get(5)?,
            })
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Recompute each item's 7- and 30-day average price across all sources.
    pub fn update_rolling_averages(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff_7d = db_timestamp(now - chrono::Duration::days(7));
        let cutoff_30d = db_timestamp(now - chrono::Duration::days(30));
        let conn = self.conn.lock();
        let updated = conn.execute(
            r#"
            UPDATE items SET
                avg_price_7d = (
                    SELECT AVG(price) FROM price_history
                    WHERE market_key = items.market_key AND recorded_at >= ?1
                ),
                avg_price_30d = (
                    SELECT AVG(price) FROM price_history
                    WHERE market_key = items.market_key AND recorded_at >= ?2
                )
            "#,
            params![cutoff_7d, cutoff_30d],
        )?;
        Ok(updated)
    }

    pub fn rolling_averages(&self, market_key: &str) -> Result<(Option<f64>, Option<f64>)> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT avg_price_7d, avg_price_30d FROM items WHERE market_key = ?1",
        )?;
        let averages = stmt
            .query_row(params![market_key], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("reading rolling averages")?;
        Ok(averages)
    }

    /// Market-wide totals and the median of the freshest quotes.
    pub fn market_stats(&self, since: DateTime<Utc>) -> Result<MarketStats> {
        let conn = self.conn.lock();
        let total_items: usize =
            conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;

        let mut stmt = conn.prepare_cached(
            r#"
            SELECT market_key, price FROM price_history
            WHERE id IN (
                SELECT MAX(id) FROM price_history
                WHERE recorded_at >= ?1
                GROUP BY market_key, source
            )
            ORDER BY price
            "#,
        )?;
        let rows = stmt.query_map(params![db_timestamp(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut quoted: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut prices = Vec::new();
        for row in rows {
            let (market_key, price) = row?;
            quoted.insert(market_key);
            prices.push(price);
        }

        let median_price = match prices.len() {
            0 => None,
            n if n % 2 == 1 => Some(prices[n / 2]),
            n => Some((prices[n / 2 - 1] + prices[n / 2]) / 2.0),
        };

        Ok(MarketStats {
            total_items,
            quoted_items: quoted.len(),
            quote_count: prices.len(),
            median_price,
        })
    }

    pub fn save_opportunity(&self, opp: &ArbitrageOpportunity) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO opportunities
                (market_key, buy_source, buy_price, sell_source, sell_price, profit_rate, detected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        stmt.execute(params![
            opp.market_key,
            opp.buy_source.as_str(),
            opp.buy_price,
            opp.sell_source.as_str(),
            opp.sell_price,
            opp.profit_rate,
            db_timestamp(opp.detected_at),
        ])?;
        Ok(())
    }

    /// Most recent opportunities, newest first.
    pub fn recent_opportunities(&self, limit: usize) -> Result<Vec<ArbitrageOpportunity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT market_key, buy_source, buy_price, sell_source, sell_price, profit_rate, detected_at
            FROM opportunities ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut opportunities = Vec::new();
        for row in rows {
            let (market_key, buy, buy_price, sell, sell_price, profit_rate, detected_at) = row?;
            let (Ok(buy_source), Ok(sell_source)) =
                (buy.parse::<Source>(), sell.parse::<Source>())
            else {
                continue;
            };
            let detected_at = DateTime::parse_from_rfc3339(&detected_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default();
            opportunities.push(ArbitrageOpportunity {
                market_key,
                buy_source,
                buy_price,
                sell_source,
                sell_price,
                profit_rate,
                detected_at,
            });
        }
        Ok(opportunities)
    }

    /// Delete price history and opportunities older than `cutoff`. Returns
    /// the number of price rows removed.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let ts = db_timestamp(cutoff);
        let conn = self.conn.lock();
        let prices = conn.execute(
            "DELETE FROM price_history WHERE recorded_at < ?1",
            params![ts],
        )?;
        let opps = conn.execute(
            "DELETE FROM opportunities WHERE detected_at < ?1",
            params![ts],
        )?;
        debug!(prices, opps, "purged expired rows");
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn listing(market_key: &str, source: Source, price: f64, at: DateTime<Utc>) -> ListingRecord {
        ListingRecord {
            market_key: market_key.to_string(),
            source,
            price,
            secondary_price: None,
            volume: 10,
            observed_at: at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn upsert_item_is_last_writer_wins() {
        let db = MarketDb::open_in_memory().unwrap();
        let mut entry = ItemCatalogEntry {
            market_key: "AK-47 | Redline (Field-Tested)".to_string(),
            display_name: "AK-47 | Redline".to_string(),
            ..Default::default()
        };
        db.upsert_item(&entry, t0()).unwrap();
        entry.rarity = "Classified".to_string();
        db.upsert_item(&entry, t0()).unwrap();

        let items = db.get_active_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].rarity, "Classified");
    }

    #[test]
    fn snapshot_takes_latest_per_source_and_honors_freshness() {
        let db = MarketDb::open_in_memory().unwrap();
        let base = t0();
        // Two steam observations: only the newer one should survive.
        db.append_price_record(&listing("ak", Source::Steam, 100.0, base)).unwrap();
        db.append_price_record(&listing("ak", Source::Steam, 105.0, base + chrono::Duration::minutes(5)))
            .unwrap();
        db.append_price_record(&listing("ak", Source::Buff, 80.0, base)).unwrap();
        // Stale youpin row from well before the window.
        db.append_price_record(&listing("ak", Source::Youpin, 60.0, base - chrono::Duration::hours(12)))
            .unwrap();

        let snapshot = db
            .latest_price_snapshot(base - chrono::Duration::hours(6))
            .unwrap();
        let prices = &snapshot["ak"];
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[&Source::Steam], 105.0);
        assert_eq!(prices[&Source::Buff], 80.0);
        assert!(!prices.contains_key(&Source::Youpin));
    }

    #[test]
    fn per_item_prices_match_snapshot() {
        let db = MarketDb::open_in_memory().unwrap();
        db.append_price_record(&listing("awp", Source::Buff, 612.5, t0())).unwrap();
        db.append_price_record(&listing("other", Source::Buff, 1.0, t0())).unwrap();

        let prices = db
            .latest_prices_for_item("awp", t0() - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[&Source::Buff], 612.5);
    }

    #[test]
    fn rolling_averages_split_7_and_30_day_windows() {
        let db = MarketDb::open_in_memory().unwrap();
        let now = t0();
        let entry = ItemCatalogEntry {
            market_key: "ak".to_string(),
            display_name: "ak".to_string(),
            ..Default::default()
        };
        db.upsert_item(&entry, now).unwrap();
        // Inside 7 days.
        db.append_price_record(&listing("ak", Source::Steam, 100.0, now - chrono::Duration::days(1)))
            .unwrap();
        db.append_price_record(&listing("ak", Source::Buff, 110.0, now - chrono::Duration::days(2)))
            .unwrap();
        // Inside 30 days only.
        db.append_price_record(&listing("ak", Source::Steam, 160.0, now - chrono::Duration::days(20)))
            .unwrap();
        // Outside both.
        db.append_price_record(&listing("ak", Source::Steam, 999.0, now - chrono::Duration::days(40)))
            .unwrap();

        db.update_rolling_averages(now).unwrap();
        let (avg7, avg30) = db.rolling_averages("ak").unwrap();
        assert_eq!(avg7, Some(105.0));
        assert_eq!(avg30, Some((100.0 + 110.0 + 160.0) / 3.0));
    }

    #[test]
    fn market_stats_summarize_fresh_quotes_only() {
        let db = MarketDb::open_in_memory().unwrap();
        let now = t0();
        for key in ["ak", "awp", "m4"] {
            db.upsert_item(
                &ItemCatalogEntry {
                    market_key: key.to_string(),
                    display_name: key.to_string(),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        }
        db.append_price_record(&listing("ak", Source::Steam, 100.0, now)).unwrap();
        db.append_price_record(&listing("ak", Source::Buff, 80.0, now)).unwrap();
        db.append_price_record(&listing("awp", Source::Buff, 612.5, now)).unwrap();
        // Superseded and stale rows stay out of the summary.
        db.append_price_record(&listing("ak", Source::Steam, 90.0, now - chrono::Duration::minutes(5)))
            .unwrap();
        db.append_price_record(&listing("m4", Source::Steam, 250.0, now - chrono::Duration::hours(12)))
            .unwrap();

        let stats = db.market_stats(now - chrono::Duration::hours(6)).unwrap();
        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.quoted_items, 2);
        assert_eq!(stats.quote_count, 3);
        assert_eq!(stats.median_price, Some(100.0));

        let empty = db.market_stats(now + chrono::Duration::hours(1)).unwrap();
        assert_eq!(empty.quote_count, 0);
        assert_eq!(empty.median_price, None);
    }

    #[test]
    fn purge_removes_old_rows_and_counts_them() {
        let db = MarketDb::open_in_memory().unwrap();
        let now = t0();
        db.append_price_record(&listing("ak", Source::Steam, 100.0, now)).unwrap();
        db.append_price_record(&listing("ak", Source::Steam, 90.0, now - chrono::Duration::days(100)))
            .unwrap();
        db.save_opportunity(&ArbitrageOpportunity {
            market_key: "ak".to_string(),
            buy_source: Source::Buff,
            buy_price: 80.0,
            sell_source: Source::Steam,
            sell_price: 100.0,
            profit_rate: 25.0,
            detected_at: now - chrono::Duration::days(100),
        })
        .unwrap();

        let removed = db.purge_before(now - chrono::Duration::days(90)).unwrap();
        assert_eq!(removed, 1);
        assert!(db.recent_opportunities(10).unwrap().is_empty());

        let snapshot = db.latest_price_snapshot(now - chrono::Duration::hours(1)).unwrap();
        assert_eq!(snapshot["ak"][&Source::Steam], 100.0);
    }

    #[test]
    fn opportunities_round_trip_newest_first() {
        let db = MarketDb::open_in_memory().unwrap();
        for (i, rate) in [10.0, 20.0].iter().enumerate() {
            db.save_opportunity(&ArbitrageOpportunity {
                market_key: format!("item-{i}"),
                buy_source: Source::Buff,
                buy_price: 80.0,
                sell_source: Source::Youpin,
                sell_price: 80.0 * (1.0 + rate / 100.0),
                profit_rate: *rate,
                detected_at: t0(),
            })
            .unwrap();
        }
        let opps = db.recent_opportunities(10).unwrap();
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].market_key, "item-1");
        assert_eq!(opps[0].profit_rate, 20.0);
        assert_eq!(opps[0].detected_at, t0());
    }

    #[test]
    fn file_backed_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.db");
        {
            let db = MarketDb::open(&path).unwrap();
            db.append_price_record(&listing("ak", Source::Steam, 100.0, t0())).unwrap();
        }
        let db = MarketDb::open(&path).unwrap();
        let snapshot = db.latest_price_snapshot(t0() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(snapshot["ak"][&Source::Steam], 100.0);
    }
}
