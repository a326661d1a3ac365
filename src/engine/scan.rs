// =============================================================================
// ScanMarket — refresh the candidate universe and its indicators
// =============================================================================

use anyhow::Result;
use tracing::{debug, warn};

use crate::domain::{self, Coin};
use crate::error::EngineError;
use crate::indicators::{rsi, sma};

use super::{canonical_symbol, Engine, EngineState, CANDIDATE_POOL_SIZE, OHLCV_WINDOW, SCAN_TIMEFRAME};

impl Engine {
    pub(super) async fn scan_market(&self, state: &mut EngineState) -> Result<()> {
        let tickers = self.gateway.fetch_tickers().await?;

        let mut candidates: Vec<_> = tickers
            .into_iter()
            .filter(|t| {
                t.symbol.ends_with(domain::QUOTE_ASSET)
                    && t.quote_volume > 0.0
                    && t.last > 0.0
                    && !domain::EXCLUDED_SYMBOLS.contains(&t.symbol.as_str())
            })
            .collect();

        candidates.sort_by(|a, b| b.quote_volume.partial_cmp(&a.quote_volume).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(CANDIDATE_POOL_SIZE);

        let rsi_period = state.settings.rsi_period;
        let sma_short_period = state.settings.sma_short_period;
        let sma_long_period = state.settings.sma_long_period;

        let mut coins = Vec::with_capacity(candidates.len());
        for ticker in candidates {
            let base_asset = ticker
                .symbol
                .strip_suffix(domain::QUOTE_ASSET)
                .unwrap_or(&ticker.symbol)
                .to_string();

            let klines = self.gateway.fetch_ohlcv(&ticker.symbol, SCAN_TIMEFRAME, OHLCV_WINDOW).await;
            let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();

            if !ticker.last.is_finite() || ticker.last <= 0.0 {
                let err = EngineError::InvariantViolation {
                    symbol: ticker.symbol.clone(),
                    reason: format!("non-finite or non-positive price {}", ticker.last),
                };
                warn!(error = %err, "skipping symbol this cycle");
                continue;
            }

            let rsi_value = rsi(&closes, rsi_period).last().copied();
            let sma_short_value = sma(&closes, sma_short_period).last().copied();
            let sma_long_value = sma(&closes, sma_long_period).last().copied();

            if rsi_value.is_some_and(|v| !v.is_finite()) || sma_short_value.is_some_and(|v| !v.is_finite()) || sma_long_value.is_some_and(|v| !v.is_finite()) {
                let err = EngineError::InvariantViolation {
                    symbol: ticker.symbol.clone(),
                    reason: "non-finite indicator value".to_string(),
                };
                warn!(error = %err, "skipping symbol this cycle");
                continue;
            }

            coins.push(Coin {
                symbol: canonical_symbol(&base_asset),
                base_asset,
                quote_asset: domain::QUOTE_ASSET.to_string(),
                price: ticker.last,
                price_change_24h_pct: ticker.percentage,
                base_volume: ticker.base_volume,
                quote_volume: ticker.quote_volume,
                rsi: rsi_value,
                sma_short: sma_short_value,
                sma_long: sma_long_value,
            });
        }

        coins.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));

        debug!(count = coins.len(), "market scan complete");
        state.market_data = coins;
        self.bus.publish_market(state.market_data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_and_quote_suffix_filter_logic() {
        // Mirrors the predicate used above without needing a live gateway.
        let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "NOTAQUOTE"];
        let passing: Vec<&&str> = symbols
            .iter()
            .filter(|s| s.ends_with(domain::QUOTE_ASSET) && !domain::EXCLUDED_SYMBOLS.contains(s))
            .collect();
        assert_eq!(passing, vec![&"SOLUSDT"]);
    }
}
