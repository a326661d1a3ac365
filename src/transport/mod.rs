// =============================================================================
// Transport / Bridge — thin axum router over the engine's EventBus
// =============================================================================
//
// Two routes only: `/ws` (the push/command channel the UI speaks) and
// `/health` (plain liveness probe, teacher precedent: `api/rest.rs`
// `health`). No bearer-token admin API is reproduced here — the transport
// does no domain logic of its own, it only demultiplexes commands into
// `Engine` calls and relays `EventBus` events back out.
// =============================================================================

pub mod rest;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(rest::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Settings;
    use crate::events::EventBus;
    use crate::error::EngineError;
    use crate::exchange::{Balance, ExchangeGateway, FilledOrder, Kline, OrderSide, Ticker};
    use crate::persistence::PersistenceStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct NoopGateway;

    #[async_trait]
    impl ExchangeGateway for NoopGateway {
        async fn initialize(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn validate_api_key_permissions(&self) -> Result<bool, EngineError> {
            Ok(true)
        }
        async fn fetch_tickers(&self) -> Result<Vec<Ticker>, EngineError> {
            Ok(Vec::new())
        }
        async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: u32) -> Vec<Kline> {
            Vec::new()
        }
        async fn get_balance(&self) -> Result<HashMap<String, Balance>, EngineError> {
            Ok(HashMap::new())
        }
        async fn place_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            amount: f64,
            _price: Option<f64>,
        ) -> Result<FilledOrder, EngineError> {
            Ok(FilledOrder { id: None, price: None, average: None, filled: None, amount, cost: None })
        }
    }

    #[tokio::test]
    async fn router_builds_with_health_route() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PersistenceStore::open(dir.path()).unwrap());
        let bus = Arc::new(EventBus::new());
        let engine = Engine::new(Arc::new(NoopGateway), store, bus, Settings::default());
        let _router = build_router(engine);
    }
}
