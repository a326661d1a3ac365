// =============================================================================
// ExecuteStrategy — sell path (reconcile + exits), then buy path (entries)
// =============================================================================

use tracing::{error, info, warn};

use crate::domain::{self, ActiveTrade, BotLog, CompletedTrade, LogType, TradeType};
use crate::error::EngineError;
use crate::exchange::OrderSide;

use super::{raw_symbol, Engine, EngineState};

impl Engine {
    pub(super) async fn execute_strategy(&self, state: &mut EngineState) {
        self.execute_sell_path(state).await;
        self.execute_buy_path(state).await;
    }

    // -------------------------------------------------------------------------
    // Sell path
    // -------------------------------------------------------------------------

    async fn execute_sell_path(&self, state: &mut EngineState) {
        let symbols: Vec<String> = state.active_trades.keys().cloned().collect();

        for symbol in symbols {
            let Some(price) = state
                .market_data
                .iter()
                .find(|c| c.symbol == symbol)
                .map(|c| c.price)
            else {
                // Price not refreshed this cycle — wait for next scan.
                continue;
            };

            let Some(portfolio_item) = state.portfolio.iter().find(|p| p.symbol == symbol) else {
                self.reap_unreconciled(state, &symbol, "no matching portfolio balance");
                continue;
            };
            if portfolio_item.free <= 0.0 {
                self.reap_unreconciled(state, &symbol, "portfolio balance is zero");
                continue;
            }
            let free_amount = portfolio_item.free;

            let trade = state.active_trades.get(&symbol).cloned().expect("symbol drawn from active_trades keys");

            let initial_stop_price = trade.purchase_price * (1.0 - state.settings.stop_loss_pct / 100.0);
            let target_price = trade.purchase_price * (1.0 + state.settings.target_profit_pct / 100.0);

            let effective_stop = if state.settings.use_trailing_stop {
                let high = trade.highest_price_since_buy.unwrap_or(trade.purchase_price).max(price);

                if Some(high) != trade.highest_price_since_buy {
                    if let Some(entry) = state.active_trades.get_mut(&symbol) {
                        entry.highest_price_since_buy = Some(high);
                    }
                    if let Some(updated) = state.active_trades.get(&symbol) {
                        debug_assert!(updated.invariant_holds(), "trailing-stop high update must not violate domain invariants");
                        if let Err(err) = self.store.save_active_trade(&symbol, updated) {
                            warn!(symbol = %symbol, error = %err, "failed to persist updated trailing-stop high");
                        }
                    }
                }

                let armed = high > trade.purchase_price * (1.0 + state.settings.trailing_stop_arm_pct / 100.0);
                if armed {
                    let trailing_stop_price = high * (1.0 - state.settings.trailing_stop_offset_pct / 100.0);
                    initial_stop_price.max(trailing_stop_price)
                } else {
                    initial_stop_price
                }
            } else {
                initial_stop_price
            };

            let sell_reason = if price >= target_price {
                Some("Take Profit")
            } else if price <= effective_stop {
                Some("Stop Loss")
            } else {
                None
            };

            let Some(reason) = sell_reason else { continue };

            if free_amount * price < domain::MIN_TRADE_VALUE_QUOTE {
                warn!(symbol = %symbol, value = free_amount * price, "sell skipped — below minimum trade value (dust)");
                self.log(BotLog::new(LogType::Warning, format!("{symbol}: skipped dust sell below minimum trade value")).with_pair(symbol.clone()));
                continue;
            }

            self.perform_sell(state, &symbol, &trade, free_amount, price, reason).await;
        }
    }

    fn reap_unreconciled(&self, state: &mut EngineState, symbol: &str, reason: &str) {
        let err = EngineError::ReconciliationWarning { symbol: symbol.to_string(), reason: reason.to_string() };
        warn!(error = %err, "reaping unreconciled active trade");
        self.log(
            BotLog::new(LogType::Warning, format!("{symbol}: position reconciliation removed it ({reason})"))
                .with_pair(symbol),
        );
        state.active_trades.remove(symbol);
        if let Err(err) = self.store.delete_active_trade(symbol) {
            warn!(symbol, error = %err, "failed to persist reaped active-trade deletion");
        }
    }

    async fn perform_sell(
        &self,
        state: &mut EngineState,
        symbol: &str,
        trade: &ActiveTrade,
        amount_to_sell: f64,
        market_price: f64,
        reason: &str,
    ) {
        let result = self
            .gateway
            .place_order(&raw_symbol(symbol), OrderSide::Sell, amount_to_sell, None)
            .await;

        let order = match result {
            Ok(order) => order,
            Err(EngineError::GatewayRejection(reason)) => {
                error!(symbol, error = %reason, "sell order rejected by venue — position left intact for retry");
                self.log(
                    BotLog::new(LogType::Error, format!("{symbol}: sell order rejected ({reason})")).with_pair(symbol),
                );
                return;
            }
            Err(err) => {
                warn!(symbol, error = %err, "sell order failed — position left intact for retry");
                self.log(BotLog::new(LogType::Error, format!("{symbol}: sell order failed ({err})")).with_pair(symbol));
                return;
            }
        };

        let exec_price = order.exec_price(market_price);
        let filled = order.filled_amount();
        let cost = order.exec_cost(market_price);

        let profit = cost - trade.purchase_price * filled;
        let profit_pct = if trade.purchase_price * filled != 0.0 {
            profit / (trade.purchase_price * filled) * 100.0
        } else {
            0.0
        };

        let ledger_row = CompletedTrade {
            id: 0,
            timestamp: chrono::Utc::now().timestamp_millis(),
            trade_type: TradeType::Sell,
            pair: symbol.to_string(),
            price: exec_price,
            amount: filled,
            cost,
            order_id: order.id.map(|id| id.to_string()),
            fee_amount: None,
            fee_currency: None,
            profit_amount: Some(profit),
            profit_percent: Some(profit_pct),
            purchase_price_for_sell: Some(trade.purchase_price),
        };

        match self.store.save_ledger_item(ledger_row.clone()) {
            Ok(id) => {
                let mut stored = ledger_row;
                stored.id = id;
                state.push_ledger(stored.clone());
                self.bus.publish_ledger(stored);
            }
            Err(err) => {
                warn!(symbol, error = %err, "failed to persist ledger row — keeping in-memory only");
                state.push_ledger(ledger_row.clone());
                self.bus.publish_ledger(ledger_row);
            }
        }

        state.active_trades.remove(symbol);
        if let Err(err) = self.store.delete_active_trade(symbol) {
            warn!(symbol, error = %err, "failed to persist active-trade deletion after sell");
        }

        info!(symbol, reason, exec_price, profit_pct, "sold position");
        self.log(
            BotLog::new(LogType::Sell, format!("{symbol}: sold at {exec_price:.6} ({reason}, {profit_pct:.2}%)"))
                .with_pair(symbol)
                .with_price(exec_price)
                .with_amount(filled)
                .with_profit_percent(profit_pct),
        );
    }

    // -------------------------------------------------------------------------
    // Buy path
    // -------------------------------------------------------------------------

    async fn execute_buy_path(&self, state: &mut EngineState) {
        let mut candidates: Vec<_> = state
            .market_data
            .iter()
            .filter(|coin| {
                let Some(rsi) = coin.rsi else { return false };
                let Some(sma_short) = coin.sma_short else { return false };
                let Some(sma_long) = coin.sma_long else { return false };

                !state.active_trades.contains_key(&coin.symbol)
                    && coin.price <= state.settings.max_coin_price
                    && !domain::EXCLUDED_SYMBOLS.contains(&raw_symbol(&coin.symbol).as_str())
                    && rsi < state.settings.rsi_buy_threshold
                    && sma_short > sma_long
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| b.quote_volume.partial_cmp(&a.quote_volume).unwrap_or(std::cmp::Ordering::Equal));

        let Some(pick) = candidates.into_iter().next() else { return };

        if state.active_trades.len() >= state.settings.max_open_trades {
            return;
        }
        if state.usdt_balance < state.settings.trade_amount_quote {
            return;
        }

        let amount = state.settings.trade_amount_quote / pick.price;

        let result = self
            .gateway
            .place_order(&raw_symbol(&pick.symbol), OrderSide::Buy, amount, None)
            .await;

        let order = match result {
            Ok(order) => order,
            Err(EngineError::GatewayRejection(reason)) => {
                error!(symbol = %pick.symbol, error = %reason, "buy order rejected by venue");
                self.log(
                    BotLog::new(LogType::Error, format!("{}: buy order rejected ({reason})", pick.symbol))
                        .with_pair(pick.symbol.clone()),
                );
                return;
            }
            Err(err) => {
                warn!(symbol = %pick.symbol, error = %err, "buy order failed");
                self.log(BotLog::new(LogType::Error, format!("{}: buy order failed ({err})", pick.symbol)).with_pair(pick.symbol.clone()));
                return;
            }
        };

        let exec_price = order.exec_price(pick.price);
        let filled = order.filled_amount();
        let cost = order.exec_cost(pick.price);
        let now = chrono::Utc::now().timestamp_millis();

        let trade = ActiveTrade {
            purchase_price: exec_price,
            amount: filled,
            timestamp: now,
            highest_price_since_buy: Some(exec_price),
        };
        debug_assert!(trade.invariant_holds(), "freshly opened trade must satisfy domain invariants");

        state.active_trades.insert(pick.symbol.clone(), trade.clone());
        if let Err(err) = self.store.save_active_trade(&pick.symbol, &trade) {
            warn!(symbol = %pick.symbol, error = %err, "failed to persist new active trade");
        }

        let ledger_row = CompletedTrade {
            id: 0,
            timestamp: now,
            trade_type: TradeType::Buy,
            pair: pick.symbol.clone(),
            price: exec_price,
            amount: filled,
            cost,
            order_id: order.id.map(|id| id.to_string()),
            fee_amount: None,
            fee_currency: None,
            profit_amount: None,
            profit_percent: None,
            purchase_price_for_sell: None,
        };

        match self.store.save_ledger_item(ledger_row.clone()) {
            Ok(id) => {
                let mut stored = ledger_row;
                stored.id = id;
                state.push_ledger(stored.clone());
                self.bus.publish_ledger(stored);
            }
            Err(err) => {
                warn!(symbol = %pick.symbol, error = %err, "failed to persist ledger row — keeping in-memory only");
                state.push_ledger(ledger_row.clone());
                self.bus.publish_ledger(ledger_row);
            }
        }

        info!(symbol = %pick.symbol, exec_price, filled, "opened position");
        self.log(
            BotLog::new(LogType::Buy, format!("{}: bought at {exec_price:.6}", pick.symbol))
                .with_pair(pick.symbol.clone())
                .with_price(exec_price)
                .with_amount(filled),
        );
    }
}
