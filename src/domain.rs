// =============================================================================
// Domain model — Settings, market snapshot, portfolio, trades, log, status
// =============================================================================
//
// Every mutable value here is exclusively owned by the Trading Engine. Other
// components only ever see a `Clone` of one of these types, obtained through
// an `EventBus` subscription.
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Immutable snapshot of tunable strategy parameters. Replaced wholesale by
/// `UpdateSettings`, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub max_coin_price: f64,
    pub trade_amount_quote: f64,
    pub scan_interval_ms: u64,
    pub target_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub max_open_trades: usize,
    pub rsi_period: usize,
    pub rsi_buy_threshold: f64,
    pub sma_short_period: usize,
    pub sma_long_period: usize,
    pub use_trailing_stop: bool,
    pub trailing_stop_arm_pct: f64,
    pub trailing_stop_offset_pct: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_coin_price: 50.0,
            trade_amount_quote: 10.0,
            scan_interval_ms: 30_000,
            target_profit_pct: 2.0,
            stop_loss_pct: 1.5,
            max_open_trades: 5,
            rsi_period: 14,
            rsi_buy_threshold: 35.0,
            sma_short_period: 9,
            sma_long_period: 21,
            use_trailing_stop: true,
            trailing_stop_arm_pct: 1.0,
            trailing_stop_offset_pct: 0.5,
        }
    }
}

/// Error returned when a `Settings` value violates one of its invariants.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("sma_short_period ({short}) must be less than sma_long_period ({long})")]
    SmaOrder { short: usize, long: usize },
    #[error("{field} period must be >= 2, got {value}")]
    PeriodTooSmall { field: &'static str, value: usize },
    #[error("{field} must be > 0, got {value}")]
    NonPositivePercent { field: &'static str, value: f64 },
    #[error("scan_interval_ms must be >= 2000, got {value}")]
    ScanIntervalTooShort { value: u64 },
}

impl Settings {
    /// Validate the invariants from spec.md §3. Called whenever a new
    /// settings value is about to replace the engine's current one.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sma_short_period >= self.sma_long_period {
            return Err(SettingsError::SmaOrder {
                short: self.sma_short_period,
                long: self.sma_long_period,
            });
        }
        for (field, value) in [
            ("rsi_period", self.rsi_period),
            ("sma_short_period", self.sma_short_period),
            ("sma_long_period", self.sma_long_period),
        ] {
            if value < 2 {
                return Err(SettingsError::PeriodTooSmall { field, value });
            }
        }
        for (field, value) in [
            ("target_profit_pct", self.target_profit_pct),
            ("stop_loss_pct", self.stop_loss_pct),
            ("rsi_buy_threshold", self.rsi_buy_threshold),
            ("trailing_stop_arm_pct", self.trailing_stop_arm_pct),
            ("trailing_stop_offset_pct", self.trailing_stop_offset_pct),
        ] {
            if value <= 0.0 {
                return Err(SettingsError::NonPositivePercent { field, value });
            }
        }
        if self.scan_interval_ms < 2000 {
            return Err(SettingsError::ScanIntervalTooShort {
                value: self.scan_interval_ms,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Coin — per-scan market snapshot
// ---------------------------------------------------------------------------

/// A single trading pair as observed during the most recent scan. Never
/// persisted — recomputed every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price: f64,
    pub price_change_24h_pct: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub sma_short: Option<f64>,
    #[serde(default)]
    pub sma_long: Option<f64>,
}

// ---------------------------------------------------------------------------
// PortfolioItem
// ---------------------------------------------------------------------------

/// A non-quote asset balance, joined against `ActiveTrades` for entry price
/// and purchase time when the bot holds a position in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub free: f64,
    pub locked: f64,
    #[serde(default)]
    pub avg_purchase_price: Option<f64>,
    #[serde(default)]
    pub purchase_timestamp: Option<i64>,
}

// ---------------------------------------------------------------------------
// ActiveTrade
// ---------------------------------------------------------------------------

/// One open bot-managed position, keyed by symbol in the engine's
/// `active_trades` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub purchase_price: f64,
    pub amount: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub highest_price_since_buy: Option<f64>,
}

impl ActiveTrade {
    /// `true` when the invariants from spec.md §3 hold: positive price and
    /// amount, and `highest_price_since_buy >= purchase_price` whenever set.
    pub fn invariant_holds(&self) -> bool {
        self.amount > 0.0
            && self.purchase_price > 0.0
            && self
                .highest_price_since_buy
                .map(|h| h >= self.purchase_price)
                .unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// CompletedTrade — append-only ledger row
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub id: u64,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub pair: String,
    pub price: f64,
    pub amount: f64,
    pub cost: f64,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub fee_amount: Option<f64>,
    #[serde(default)]
    pub fee_currency: Option<String>,
    #[serde(default)]
    pub profit_amount: Option<f64>,
    #[serde(default)]
    pub profit_percent: Option<f64>,
    #[serde(default)]
    pub purchase_price_for_sell: Option<f64>,
}

// ---------------------------------------------------------------------------
// BotLog — ephemeral, broadcast-only
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    Info,
    Success,
    Warning,
    Error,
    Buy,
    Sell,
    ApiKey,
    StrategyInfo,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotLog {
    pub id: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub message: String,
    #[serde(default)]
    pub pair: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub profit_percent: Option<f64>,
}

impl BotLog {
    pub fn new(log_type: LogType, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            log_type,
            message: message.into(),
            pair: None,
            price: None,
            amount: None,
            profit_percent: None,
        }
    }

    pub fn with_pair(mut self, pair: impl Into<String>) -> Self {
        self.pair = Some(pair.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_profit_percent(mut self, pct: f64) -> Self {
        self.profit_percent = Some(pct);
        self
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Initializing,
    Stopped,
    Running,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed constants shared across the crate (spec.md §6)
// ---------------------------------------------------------------------------

/// The only quote asset the engine trades against.
pub const QUOTE_ASSET: &str = "USDT";

/// Pairs the strategy never trades, regardless of how they score.
pub const EXCLUDED_SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "BNBUSDT"];

/// Minimum notional value (in quote units) below which a sell is skipped as
/// dust rather than placed.
pub const MIN_TRADE_VALUE_QUOTE: f64 = 10.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn sma_order_violation_rejected() {
        let mut s = Settings::default();
        s.sma_short_period = 21;
        s.sma_long_period = 9;
        assert!(matches!(s.validate(), Err(SettingsError::SmaOrder { .. })));
    }

    #[test]
    fn short_period_rejected() {
        let mut s = Settings::default();
        s.rsi_period = 1;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::PeriodTooSmall { field: "rsi_period", .. })
        ));
    }

    #[test]
    fn nonpositive_percent_rejected() {
        let mut s = Settings::default();
        s.stop_loss_pct = 0.0;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::NonPositivePercent { field: "stop_loss_pct", .. })
        ));
    }

    #[test]
    fn short_scan_interval_rejected() {
        let mut s = Settings::default();
        s.scan_interval_ms = 500;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::ScanIntervalTooShort { .. })
        ));
    }

    #[test]
    fn active_trade_invariant() {
        let good = ActiveTrade {
            purchase_price: 1.0,
            amount: 1.0,
            timestamp: 0,
            highest_price_since_buy: Some(1.5),
        };
        assert!(good.invariant_holds());

        let bad = ActiveTrade {
            purchase_price: 1.0,
            amount: 1.0,
            timestamp: 0,
            highest_price_since_buy: Some(0.5),
        };
        assert!(!bad.invariant_holds());
    }

    #[test]
    fn settings_roundtrip_json() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
