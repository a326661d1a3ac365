// =============================================================================
// Exchange Gateway — uniform façade over the external venue (spec.md §4.C)
// =============================================================================
//
// `ExchangeGateway` is the port the engine talks to. The only implementation
// shipped here targets Binance Spot, but the engine never depends on
// anything beyond this trait, so a sandbox or a different venue can be
// substituted without touching engine code.
// =============================================================================

pub mod binance;
pub mod rate_limit;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A single ticker row as returned by `fetch_tickers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    pub percentage: f64,
}

/// One OHLCV candle. `close_time` is kept for completeness but the engine
/// only ever consumes `close`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

/// Free / locked / total balance for a single currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub free: f64,
    pub locked: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Result of a market order. `average`/`filled`/`cost` fall back to
/// `price`/`amount`/`filled * price` respectively when the venue omits them
/// (spec.md §4.C / §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilledOrder {
    pub id: Option<u64>,
    pub price: Option<f64>,
    pub average: Option<f64>,
    pub filled: Option<f64>,
    pub amount: f64,
    pub cost: Option<f64>,
}

impl FilledOrder {
    /// Execution price used for downstream PnL math: `average`, falling
    /// back to `price`, falling back to the market price observed when the
    /// order was placed (the caller supplies that fallback).
    pub fn exec_price(&self, market_price_fallback: f64) -> f64 {
        self.average.or(self.price).unwrap_or(market_price_fallback)
    }

    /// Filled quantity: `filled`, falling back to `amount` (the requested
    /// quantity) — per spec.md's Open Question (a), this fallback should
    /// only ever be hit when the venue genuinely omits the field.
    pub fn filled_amount(&self) -> f64 {
        self.filled.unwrap_or(self.amount)
    }

    /// Notional cost: `cost`, falling back to `filled_amount * exec_price`.
    pub fn exec_cost(&self, market_price_fallback: f64) -> f64 {
        self.cost
            .unwrap_or_else(|| self.filled_amount() * self.exec_price(market_price_fallback))
    }
}

/// Uniform façade over an external spot exchange. All operations are
/// fallible except `fetch_ohlcv`, which swallows per-symbol errors into an
/// empty result so a single bad symbol never aborts a scan (spec.md §4.C).
/// Failures are classified into `EngineError`'s kinds (spec.md §7) rather
/// than left as bare `anyhow::Error`, so the engine can branch on them.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Load markets, apply sandbox mode, then validate credentials.
    async fn initialize(&self) -> Result<(), EngineError>;

    /// `false` MUST be returned when the credentials can withdraw funds —
    /// the engine refuses to start in that case (spec.md §4.C security gate).
    async fn validate_api_key_permissions(&self) -> Result<bool, EngineError>;

    /// Only tickers with `last > 0` are returned.
    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, EngineError>;

    /// Non-fatal: per-symbol failures yield an empty vec, never an error.
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Vec<Kline>;

    /// Currency -> balance map.
    async fn get_balance(&self) -> Result<HashMap<String, Balance>, EngineError>;

    /// `type=market` is the only mode the engine ever requests; `price` is
    /// accepted for interface completeness but ignored by market orders.
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        price: Option<f64>,
    ) -> Result<FilledOrder, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_price_prefers_average_then_price_then_fallback() {
        let o = FilledOrder { id: None, price: Some(1.0), average: Some(2.0), filled: None, amount: 1.0, cost: None };
        assert_eq!(o.exec_price(9.0), 2.0);

        let o = FilledOrder { id: None, price: Some(1.0), average: None, filled: None, amount: 1.0, cost: None };
        assert_eq!(o.exec_price(9.0), 1.0);

        let o = FilledOrder { id: None, price: None, average: None, filled: None, amount: 1.0, cost: None };
        assert_eq!(o.exec_price(9.0), 9.0);
    }

    #[test]
    fn filled_amount_falls_back_to_requested_amount() {
        let o = FilledOrder { id: None, price: None, average: None, filled: None, amount: 5.0, cost: None };
        assert_eq!(o.filled_amount(), 5.0);

        let o = FilledOrder { id: None, price: None, average: None, filled: Some(4.5), amount: 5.0, cost: None };
        assert_eq!(o.filled_amount(), 4.5);
    }

    #[test]
    fn exec_cost_derives_from_filled_and_exec_price() {
        let o = FilledOrder { id: None, price: Some(2.0), average: None, filled: Some(3.0), amount: 3.0, cost: None };
        assert_eq!(o.exec_cost(9.0), 6.0);
    }
}
