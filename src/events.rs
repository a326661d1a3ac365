// =============================================================================
// Event Bus — single-producer (engine), multi-consumer (transport) fan-out
// =============================================================================
//
// Five channels, two delivery semantics:
//   - market / portfolio / status: `tokio::sync::watch` — newest-wins, a
//     lagging subscriber just sees the latest value on its next poll.
//   - log / ledger: `tokio::sync::broadcast` — order-preserving. A
//     `Lagged` receiver is treated as a hard disconnect (logged at WARN and
//     dropped) rather than skipped forward, since skipping would silently
//     drop entries.
//
// `subscribe()` bundles a receiver for each channel plus a composite
// `initial_state` snapshot built from the engine's current values at the
// moment of subscription — the same "full state on connect, then deltas"
// shape as the teacher's websocket handler.
// =============================================================================

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::domain::{BotLog, CompletedTrade, PortfolioItem, Settings, Status};

const LOG_CHANNEL_CAPACITY: usize = 256;
const LEDGER_CHANNEL_CAPACITY: usize = 256;

/// Per-scan market view, published wholesale on every `ScanMarket` cycle.
pub type MarketSnapshot = Vec<crate::domain::Coin>;

/// Quote-asset balance plus every non-quote holding, published on every
/// `RefreshAccount`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub portfolio: Vec<PortfolioItem>,
    pub usdt_balance: f64,
}

/// Composite state sent in full to a subscriber immediately on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialState {
    pub bot_status: Status,
    pub settings: Settings,
    pub logs: Vec<BotLog>,
    pub portfolio: Vec<PortfolioItem>,
    pub usdt_balance: f64,
    pub trade_ledger: Vec<CompletedTrade>,
    pub market_data: MarketSnapshot,
}

/// The five live channels plus the composite snapshot taken at subscribe
/// time, handed to a transport connection.
pub struct Subscription {
    pub initial_state: InitialState,
    pub status: watch::Receiver<Status>,
    pub market: watch::Receiver<MarketSnapshot>,
    pub portfolio: watch::Receiver<PortfolioSnapshot>,
    pub log: broadcast::Receiver<BotLog>,
    pub ledger: broadcast::Receiver<CompletedTrade>,
}

/// Outcome of polling a broadcast receiver through the bus's helper.
pub enum BroadcastPoll<T> {
    Item(T),
    /// The subscriber fell behind and was dropped (per spec.md §4.F).
    Disconnected,
}

pub struct EventBus {
    status_tx: watch::Sender<Status>,
    market_tx: watch::Sender<MarketSnapshot>,
    portfolio_tx: watch::Sender<PortfolioSnapshot>,
    log_tx: broadcast::Sender<BotLog>,
    ledger_tx: broadcast::Sender<CompletedTrade>,
}

impl EventBus {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(Status::Initializing);
        let (market_tx, _) = watch::channel(MarketSnapshot::new());
        let (portfolio_tx, _) = watch::channel(PortfolioSnapshot::default());
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        let (ledger_tx, _) = broadcast::channel(LEDGER_CHANNEL_CAPACITY);

        Self { status_tx, market_tx, portfolio_tx, log_tx, ledger_tx }
    }

    // -------------------------------------------------------------------------
    // Publish
    // -------------------------------------------------------------------------

    /// `send` on a `watch` channel only fails when there are zero receivers
    /// left, which is a normal, non-error condition here (no subscribers
    /// connected yet) — so publish failures are swallowed, not logged.
    pub fn publish_status(&self, status: Status) {
        let _ = self.status_tx.send(status);
    }

    pub fn publish_market(&self, snapshot: MarketSnapshot) {
        let _ = self.market_tx.send(snapshot);
    }

    pub fn publish_portfolio(&self, snapshot: PortfolioSnapshot) {
        let _ = self.portfolio_tx.send(snapshot);
    }

    /// Broadcast failures (`SendError`) only occur with zero subscribers and
    /// are likewise not an error condition.
    pub fn publish_log(&self, log: BotLog) {
        let _ = self.log_tx.send(log);
    }

    pub fn publish_ledger(&self, trade: CompletedTrade) {
        let _ = self.ledger_tx.send(trade);
    }

    // -------------------------------------------------------------------------
    // Subscribe
    // -------------------------------------------------------------------------

    pub fn subscribe(&self, initial_state: InitialState) -> Subscription {
        Subscription {
            initial_state,
            status: self.status_tx.subscribe(),
            market: self.market_tx.subscribe(),
            portfolio: self.portfolio_tx.subscribe(),
            log: self.log_tx.subscribe(),
            ledger: self.ledger_tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll a broadcast receiver once, translating `Lagged` into a hard
/// disconnect with an operator-visible `WARNING` rather than skipping
/// forward silently (spec.md §4.F).
pub async fn recv_or_disconnect<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    channel_name: &'static str,
) -> BroadcastPoll<T> {
    match rx.recv().await {
        Ok(item) => BroadcastPoll::Item(item),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(channel = channel_name, skipped, "subscriber lagged — dropping connection");
            BroadcastPoll::Disconnected
        }
        Err(broadcast::error::RecvError::Closed) => BroadcastPoll::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogType;

    #[test]
    fn subscribe_gets_the_snapshot_passed_in() {
        let bus = EventBus::new();
        let initial = InitialState {
            bot_status: Status::Stopped,
            settings: Settings::default(),
            logs: vec![],
            portfolio: vec![],
            usdt_balance: 0.0,
            trade_ledger: vec![],
            market_data: vec![],
        };
        let sub = bus.subscribe(initial);
        assert_eq!(sub.initial_state.bot_status, Status::Stopped);
    }

    #[tokio::test]
    async fn market_watch_is_newest_wins() {
        let bus = EventBus::new();
        let initial = InitialState {
            bot_status: Status::Running,
            settings: Settings::default(),
            logs: vec![],
            portfolio: vec![],
            usdt_balance: 0.0,
            trade_ledger: vec![],
            market_data: vec![],
        };
        let mut sub = bus.subscribe(initial);

        bus.publish_market(vec![]);
        bus.publish_market(vec![]);
        bus.publish_market(vec![]);

        sub.market.changed().await.unwrap();
        assert!(sub.market.borrow().is_empty());
    }

    #[tokio::test]
    async fn broadcast_lag_reports_disconnect_not_silent_skip() {
        let bus = EventBus::new();
        let mut rx = bus.log_tx.subscribe();

        for i in 0..LOG_CHANNEL_CAPACITY + 10 {
            bus.publish_log(BotLog::new(LogType::Info, format!("msg {i}")));
        }

        let mut saw_disconnect = false;
        for _ in 0..LOG_CHANNEL_CAPACITY + 10 {
            match recv_or_disconnect(&mut rx, "log").await {
                BroadcastPoll::Item(_) => {}
                BroadcastPoll::Disconnected => {
                    saw_disconnect = true;
                    break;
                }
            }
        }
        assert!(saw_disconnect);
    }
}
