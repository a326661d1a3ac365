// =============================================================================
// Trading Engine — owns all mutable domain state, runs the scan/strategy loop
// =============================================================================
//
// A single `tokio::sync::Mutex<EngineState>` is held for the entire
// `execute_loop` iteration and for `start`/`stop`/`update_settings`/the
// first `refresh_account` during `initialize` — this is a dedicated async
// task, not a thread-per-request server, so one coarse lock is simpler and
// just as correct as finer-grained locking would be. `is_scanning` and
// `is_stopping` are lock-free `AtomicBool`s checked between sub-steps,
// mirroring the teacher's pattern of atomics living beside lock-guarded
// state for fields that must be readable without blocking on the main lock.
// =============================================================================

mod scan;
mod strategy;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::{self, ActiveTrade, BotLog, Coin, CompletedTrade, LogType, PortfolioItem, Settings, Status};
use crate::error::EngineError;
use crate::events::{EventBus, InitialState, PortfolioSnapshot};
use crate::exchange::ExchangeGateway;
use crate::persistence::PersistenceStore;

/// Candidate pool size taken from the ticker scan — fixed, not configurable
/// (spec.md's Open Question (d)).
pub(crate) const CANDIDATE_POOL_SIZE: usize = 30;
/// Timeframe used for OHLCV fetches during `ScanMarket` — fixed.
pub(crate) const SCAN_TIMEFRAME: &str = "15m";
/// Number of candles fetched per candidate.
pub(crate) const OHLCV_WINDOW: u32 = 50;
/// In-memory ledger cap; older rows are dropped once this many accumulate.
const LEDGER_CAP: usize = 500;
/// Rows loaded from the persistence store on `initialize`.
const LEDGER_LOAD: usize = 100;

/// Convert a base asset (`"ETH"`) into the canonical `BASE/QUOTE` symbol
/// used throughout the domain model (`"ETH/USDT"`).
pub(crate) fn canonical_symbol(base_asset: &str) -> String {
    format!("{base_asset}/{}", domain::QUOTE_ASSET)
}

/// Convert a canonical `BASE/QUOTE` symbol back into the raw exchange
/// symbol (`"ETH/USDT"` -> `"ETHUSDT"`) expected by the gateway.
pub(crate) fn raw_symbol(canonical: &str) -> String {
    canonical.replace('/', "")
}

/// Everything the engine owns, guarded by the single mutex.
pub struct EngineState {
    pub status: Status,
    pub settings: Settings,
    pub active_trades: HashMap<String, ActiveTrade>,
    pub portfolio: Vec<PortfolioItem>,
    pub usdt_balance: f64,
    pub market_data: Vec<Coin>,
    pub trade_ledger: VecDeque<CompletedTrade>,
    scan_task: Option<JoinHandle<()>>,
}

impl EngineState {
    fn new(settings: Settings) -> Self {
        Self {
            status: Status::Initializing,
            settings,
            active_trades: HashMap::new(),
            portfolio: Vec::new(),
            usdt_balance: 0.0,
            market_data: Vec::new(),
            trade_ledger: VecDeque::new(),
            scan_task: None,
        }
    }

    fn push_ledger(&mut self, trade: CompletedTrade) {
        self.trade_ledger.push_front(trade);
        while self.trade_ledger.len() > LEDGER_CAP {
            self.trade_ledger.pop_back();
        }
    }
}

pub struct Engine {
    state: Mutex<EngineState>,
    is_scanning: AtomicBool,
    is_stopping: AtomicBool,
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<PersistenceStore>,
    bus: Arc<EventBus>,
}

impl Engine {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<PersistenceStore>,
        bus: Arc<EventBus>,
        settings: Settings,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState::new(settings)),
            is_scanning: AtomicBool::new(false),
            is_stopping: AtomicBool::new(false),
            gateway,
            store,
            bus,
        })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Called once at startup: gateway init (which itself validates API-key
    /// permissions), loads persisted state, runs one `RefreshAccount`, then
    /// transitions INITIALIZING -> STOPPED (or -> ERROR on any failure).
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Err(err) = self.gateway.initialize().await {
            match &err {
                EngineError::Permission => {
                    error!("gateway initialization refused — credentials permit withdrawal");
                }
                EngineError::Configuration(reason) => {
                    error!(reason, "gateway initialization failed — configuration error");
                }
                other => error!(error = %other, "gateway initialization failed"),
            }
            state.status = Status::Error;
            self.bus.publish_status(Status::Error);
            return Err(err.into());
        }

        match self.store.load_settings() {
            Ok(Some(persisted)) => state.settings = persisted,
            Ok(None) => {
                if let Err(err) = self.store.save_settings(&state.settings) {
                    warn!(error = %err, "failed to persist initial settings");
                }
            }
            Err(err) => warn!(error = %err, "failed to load persisted settings — using defaults"),
        }

        match self.store.load_active_trades() {
            Ok(trades) => state.active_trades = trades,
            Err(err) => warn!(error = %err, "failed to load persisted active trades"),
        }

        match self.store.load_ledger(LEDGER_LOAD) {
            Ok(rows) => state.trade_ledger = rows.into_iter().collect(),
            Err(err) => warn!(error = %err, "failed to load persisted trade ledger"),
        }

        if let Err(err) = self.refresh_account(&mut state).await {
            error!(error = %err, "initial refresh_account failed");
            state.status = Status::Error;
            self.bus.publish_status(Status::Error);
            return Err(err);
        }

        state.status = Status::Stopped;
        self.bus.publish_status(Status::Stopped);
        info!("engine initialized");
        Ok(())
    }

    /// Idempotent: a `start()` while already RUNNING logs `WARNING` and
    /// returns without touching the timer. Only `STOPPED -> RUNNING` is a
    /// valid transition (spec.md §4.E); in particular `ERROR` never starts
    /// the loop — that status means `Initialize` failed its security gate
    /// or another fatal precondition, and `Start` must not paper over it.
    pub async fn start(self: &Arc<Self>) {
        let interval_ms;
        {
            let mut state = self.state.lock().await;
            if state.status == Status::Running {
                warn!("start() called while already running — ignoring");
                return;
            }
            if state.status != Status::Stopped {
                error!(status = %state.status, "start() refused — engine is not in STOPPED state");
                return;
            }
            self.is_stopping.store(false, Ordering::SeqCst);
            state.status = Status::Running;
            self.bus.publish_status(Status::Running);
            interval_ms = state.settings.scan_interval_ms;
            state.scan_task = Some(self.spawn_timer(interval_ms));
        }

        // One immediate iteration outside the critical section that set up
        // the timer; `execute_loop` will re-acquire the mutex itself.
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.execute_loop().await });
    }

    /// `Stop(hard=true)` in spec.md §4.E / §5: cancels the timer immediately
    /// but never aborts an in-flight order placement, since `stop()` only
    /// reaches the timer-abort step after acquiring the same mutex an
    /// in-progress `execute_loop_inner` holds for its entire duration — by
    /// the time we get here any in-flight gateway call has already
    /// completed. Soft and hard stop are therefore functionally identical;
    /// the name is kept distinct for the transport's 1:1 command mapping.
    pub async fn stop_hard(self: &Arc<Self>) {
        self.stop().await
    }

    /// Idempotent: stopping an already-STOPPED engine is a no-op.
    pub async fn stop(self: &Arc<Self>) {
        self.is_stopping.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;

        if state.status == Status::Stopped {
            self.is_stopping.store(false, Ordering::SeqCst);
            return;
        }

        if let Some(handle) = state.scan_task.take() {
            handle.abort();
        }
        state.status = Status::Stopped;
        self.bus.publish_status(Status::Stopped);
        self.is_stopping.store(false, Ordering::SeqCst);
        info!("engine stopped");
    }

    /// Validates, persists, and swaps in a new `Settings` snapshot. If the
    /// engine is RUNNING, the timer is restarted with the new interval.
    pub async fn update_settings(self: &Arc<Self>, new_settings: Settings) -> Result<(), domain::SettingsError> {
        new_settings.validate()?;

        let mut state = self.state.lock().await;
        state.settings = new_settings;

        if let Err(err) = self.store.save_settings(&state.settings) {
            warn!(error = %err, "failed to persist updated settings");
        }

        if state.status == Status::Running {
            if let Some(handle) = state.scan_task.take() {
                handle.abort();
            }
            state.scan_task = Some(self.spawn_timer(state.settings.scan_interval_ms));
        }

        info!("settings updated");
        Ok(())
    }

    fn spawn_timer(self: &Arc<Self>, interval_ms: u64) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            ticker.tick().await; // first tick fires immediately; skip it, `start` already triggered one run
            loop {
                ticker.tick().await;
                engine.execute_loop().await;
            }
        })
    }

    // -------------------------------------------------------------------------
    // Periodic loop
    // -------------------------------------------------------------------------

    /// One full iteration: refresh account, scan the market, run the
    /// strategy. Skips entirely if a previous invocation is still running.
    pub async fn execute_loop(self: &Arc<Self>) {
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.execute_loop_inner().await {
            error!(error = %err, "execute_loop failed — continuing on next tick");
        }

        self.is_scanning.store(false, Ordering::SeqCst);
    }

    async fn execute_loop_inner(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;

        if self.is_stopping.load(Ordering::SeqCst) || state.status != Status::Running {
            return Ok(());
        }

        if let Err(err) = self.refresh_account(&mut state).await {
            warn!(error = %err, "refresh_account failed this cycle");
        }

        if self.is_stopping.load(Ordering::SeqCst) || state.status != Status::Running {
            return Ok(());
        }

        if let Err(err) = self.scan_market(&mut state).await {
            warn!(error = %err, "scan_market failed this cycle");
        }

        if self.is_stopping.load(Ordering::SeqCst) || state.status != Status::Running {
            return Ok(());
        }

        self.execute_strategy(&mut state).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // RefreshAccount
    // -------------------------------------------------------------------------

    async fn refresh_account(&self, state: &mut EngineState) -> Result<()> {
        let balances = self.gateway.get_balance().await?;

        let mut portfolio = Vec::new();
        for (asset, balance) in balances {
            if balance.total <= 0.0 {
                continue;
            }
            if asset == domain::QUOTE_ASSET {
                state.usdt_balance = balance.free;
                continue;
            }

            let symbol = canonical_symbol(&asset);
            let trade = state.active_trades.get(&symbol);
            portfolio.push(PortfolioItem {
                symbol,
                base_asset: asset,
                quote_asset: domain::QUOTE_ASSET.to_string(),
                free: balance.free,
                locked: balance.locked,
                avg_purchase_price: trade.map(|t| t.purchase_price),
                purchase_timestamp: trade.map(|t| t.timestamp),
            });
        }

        state.portfolio = portfolio;
        self.bus.publish_portfolio(PortfolioSnapshot {
            portfolio: state.portfolio.clone(),
            usdt_balance: state.usdt_balance,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Shared helpers
    // -------------------------------------------------------------------------

    /// Publish a UI-facing log entry. Operator-facing `tracing` calls at
    /// the call site are a separate, independent sink.
    fn log(&self, entry: BotLog) {
        self.bus.publish_log(entry);
    }

    /// Build the composite snapshot handed to a freshly-subscribed
    /// transport connection.
    pub async fn build_initial_state(&self) -> InitialState {
        let state = self.state.lock().await;
        InitialState {
            bot_status: state.status,
            settings: state.settings.clone(),
            logs: Vec::new(),
            portfolio: state.portfolio.clone(),
            usdt_balance: state.usdt_balance,
            trade_ledger: state.trade_ledger.iter().cloned().collect(),
            market_data: state.market_data.clone(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_and_raw_symbol_round_trip() {
        assert_eq!(canonical_symbol("ETH"), "ETH/USDT");
        assert_eq!(raw_symbol("ETH/USDT"), "ETHUSDT");
    }

    #[test]
    fn ledger_push_caps_at_limit() {
        let mut state = EngineState::new(Settings::default());
        for i in 0..(LEDGER_CAP + 10) {
            state.push_ledger(CompletedTrade {
                id: i as u64,
                timestamp: i as i64,
                trade_type: domain::TradeType::Buy,
                pair: "ETH/USDT".to_string(),
                price: 1.0,
                amount: 1.0,
                cost: 1.0,
                order_id: None,
                fee_amount: None,
                fee_currency: None,
                profit_amount: None,
                profit_percent: None,
                purchase_price_for_sell: None,
            });
        }
        assert_eq!(state.trade_ledger.len(), LEDGER_CAP);
        // Newest entry (highest id) is at the front.
        assert_eq!(state.trade_ledger.front().unwrap().id, (LEDGER_CAP + 9) as u64);
    }
}
