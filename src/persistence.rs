// =============================================================================
// Persistence Store — embedded, write-ahead-journaled key/value storage
// =============================================================================
//
// Backed by `sled`, a single-file embedded database that journals every
// write-batch internally, giving us crash safety without inventing a custom
// on-disk format. Three named trees mirror the engine's three durable
// collections; everything here is synchronous because `sled` itself is
// synchronous, and the engine only ever calls into this module while
// holding its own mutex (see `engine`), so no extra locking is layered on
// top of sled's internal concurrency.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

use crate::domain::{ActiveTrade, CompletedTrade, Settings};
use crate::error::EngineError;

const SETTINGS_KEY: &[u8] = b"singleton";

type Result<T> = std::result::Result<T, EngineError>;

/// Embedded store for bot settings, open active trades, and the trade
/// ledger history.
pub struct PersistenceStore {
    db: sled::Db,
    bot_settings: sled::Tree,
    active_trades: sled::Tree,
    trade_ledger: sled::Tree,
}

impl PersistenceStore {
    /// Open (or create) the sled database rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("failed to open sled db at {}", path.display()))
            .map_err(EngineError::Persistence)?;

        let bot_settings =
            db.open_tree("bot_settings").context("failed to open bot_settings tree").map_err(EngineError::Persistence)?;
        let active_trades = db
            .open_tree("active_trades")
            .context("failed to open active_trades tree")
            .map_err(EngineError::Persistence)?;
        let trade_ledger =
            db.open_tree("trade_ledger").context("failed to open trade_ledger tree").map_err(EngineError::Persistence)?;

        debug!(path = %path.display(), "persistence store opened");
        Ok(Self { db, bot_settings, active_trades, trade_ledger })
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let bytes = serde_json::to_vec(settings).context("failed to serialise settings").map_err(EngineError::Persistence)?;
        self.bot_settings
            .insert(SETTINGS_KEY, bytes)
            .context("failed to write settings to sled")
            .map_err(EngineError::Persistence)?;
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Option<Settings>> {
        match self
            .bot_settings
            .get(SETTINGS_KEY)
            .context("failed to read settings from sled")
            .map_err(EngineError::Persistence)?
        {
            Some(bytes) => {
                let settings = serde_json::from_slice(&bytes)
                    .context("failed to deserialise settings")
                    .map_err(EngineError::Persistence)?;
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Active trades
    // -------------------------------------------------------------------------

    pub fn save_active_trade(&self, symbol: &str, trade: &ActiveTrade) -> Result<()> {
        let bytes = serde_json::to_vec(trade).context("failed to serialise active trade").map_err(EngineError::Persistence)?;
        self.active_trades
            .insert(symbol.as_bytes(), bytes)
            .with_context(|| format!("failed to write active trade for {symbol}"))
            .map_err(EngineError::Persistence)?;
        Ok(())
    }

    pub fn delete_active_trade(&self, symbol: &str) -> Result<()> {
        self.active_trades
            .remove(symbol.as_bytes())
            .with_context(|| format!("failed to delete active trade for {symbol}"))
            .map_err(EngineError::Persistence)?;
        Ok(())
    }

    pub fn load_active_trades(&self) -> Result<HashMap<String, ActiveTrade>> {
        let mut out = HashMap::new();
        for entry in self.active_trades.iter() {
            let (key, value) = entry.context("failed to iterate active_trades tree").map_err(EngineError::Persistence)?;
            let symbol = String::from_utf8_lossy(&key).to_string();
            match serde_json::from_slice::<ActiveTrade>(&value) {
                Ok(trade) => {
                    out.insert(symbol, trade);
                }
                Err(err) => warn!(symbol, error = %err, "skipping corrupt active_trade row"),
            }
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Trade ledger
    // -------------------------------------------------------------------------

    /// Append a completed trade and return the id it was assigned. Ids are
    /// monotonically increasing `sled` keys (big-endian u64), so tree key
    /// order tracks insertion order even though the actual ordering used at
    /// read time is an explicit sort by `timestamp`.
    pub fn save_ledger_item(&self, mut trade: CompletedTrade) -> Result<u64> {
        let id = self.trade_ledger.generate_id().context("failed to generate ledger id").map_err(EngineError::Persistence)?;
        trade.id = id;
        let bytes = serde_json::to_vec(&trade).context("failed to serialise ledger item").map_err(EngineError::Persistence)?;
        self.trade_ledger
            .insert(id.to_be_bytes(), bytes)
            .context("failed to write ledger item to sled")
            .map_err(EngineError::Persistence)?;
        Ok(id)
    }

    /// Newest-first trade history, capped at `limit` rows.
    pub fn load_ledger(&self, limit: usize) -> Result<Vec<CompletedTrade>> {
        let mut rows = Vec::new();
        for entry in self.trade_ledger.iter() {
            let (_, value) = entry.context("failed to iterate trade_ledger tree").map_err(EngineError::Persistence)?;
            match serde_json::from_slice::<CompletedTrade>(&value) {
                Ok(trade) => rows.push(trade),
                Err(err) => warn!(error = %err, "skipping corrupt trade_ledger row"),
            }
        }
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);
        Ok(rows)
    }

    /// Flush all trees and drop the handle cleanly on shutdown.
    pub fn close(&self) -> Result<()> {
        self.db.flush().context("failed to flush sled db").map_err(EngineError::Persistence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeType;

    fn open_tmp() -> (tempfile::TempDir, PersistenceStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PersistenceStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn settings_round_trip() {
        let (_dir, store) = open_tmp();
        assert!(store.load_settings().unwrap().is_none());

        let settings = Settings::default();
        store.save_settings(&settings).unwrap();
        let loaded = store.load_settings().unwrap().unwrap();
        assert_eq!(loaded.rsi_period, settings.rsi_period);
        assert_eq!(loaded.max_open_trades, settings.max_open_trades);
    }

    #[test]
    fn active_trade_save_and_delete() {
        let (_dir, store) = open_tmp();
        let trade = ActiveTrade {
            purchase_price: 100.0,
            amount: 1.0,
            timestamp: 1,
            highest_price_since_buy: Some(100.0),
        };
        store.save_active_trade("ETHUSDT", &trade).unwrap();

        let loaded = store.load_active_trades().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["ETHUSDT"].purchase_price, 100.0);

        store.delete_active_trade("ETHUSDT").unwrap();
        assert!(store.load_active_trades().unwrap().is_empty());
    }

    #[test]
    fn ledger_append_assigns_unique_ids_and_orders_newest_first() {
        let (_dir, store) = open_tmp();

        let base = CompletedTrade {
            id: 0,
            timestamp: 0,
            trade_type: TradeType::Buy,
            pair: "ETHUSDT".to_string(),
            price: 100.0,
            amount: 1.0,
            cost: 100.0,
            order_id: None,
            fee_amount: None,
            fee_currency: None,
            profit_amount: None,
            profit_percent: None,
            purchase_price_for_sell: None,
        };

        let mut first = base.clone();
        first.timestamp = 1000;
        let id1 = store.save_ledger_item(first).unwrap();

        let mut second = base.clone();
        second.timestamp = 2000;
        let id2 = store.save_ledger_item(second).unwrap();

        assert_ne!(id1, id2);

        let ledger = store.load_ledger(10).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].timestamp, 2000);
        assert_eq!(ledger[1].timestamp, 1000);
    }

    #[test]
    fn ledger_respects_limit() {
        let (_dir, store) = open_tmp();
        let base = CompletedTrade {
            id: 0,
            timestamp: 0,
            trade_type: TradeType::Sell,
            pair: "BTCUSDT".to_string(),
            price: 1.0,
            amount: 1.0,
            cost: 1.0,
            order_id: None,
            fee_amount: None,
            fee_currency: None,
            profit_amount: None,
            profit_percent: None,
            purchase_price_for_sell: None,
        };
        for i in 0..5 {
            let mut t = base.clone();
            t.timestamp = i;
            store.save_ledger_item(t).unwrap();
        }
        assert_eq!(store.load_ledger(2).unwrap().len(), 2);
    }
}
