// =============================================================================
// Nexus Engine — Main Entry Point
// =============================================================================
//
// Wiring only: load config, open the persistence store, build the exchange
// gateway + event bus + engine, run `Engine::initialize`, serve the
// transport router, and shut down gracefully on Ctrl+C. All domain logic
// lives in `engine`; this file never touches `EngineState` directly.
// =============================================================================

mod config;
mod domain;
mod engine;
mod error;
mod events;
mod exchange;
mod indicators;
mod persistence;
mod transport;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EnvConfig;
use crate::domain::Settings;
use crate::engine::Engine;
use crate::events::EventBus;
use crate::exchange::binance::BinanceGateway;
use crate::exchange::ExchangeGateway;
use crate::persistence::PersistenceStore;

const DATA_DIR: &str = "data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("nexus-engine starting up");

    let env_config = EnvConfig::load();
    info!(config = ?env_config.redacted(), "resolved startup configuration");

    let store = match PersistenceStore::open(DATA_DIR) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            // spec.md §4.B: a persistence failure at startup must surface as
            // ERROR rather than silently running in-memory-only.
            error!(error = %err, "failed to open persistence store — cannot start");
            return Err(err.into());
        }
    };

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BinanceGateway::new(
        env_config.api_key.clone(),
        env_config.api_secret.clone(),
        env_config.is_sandbox,
    ));

    let bus = Arc::new(EventBus::new());
    let engine = Engine::new(gateway, store.clone(), bus, Settings::default());

    if let Err(err) = engine.initialize().await {
        // `initialize` has already transitioned the engine to ERROR and
        // published that status; the process keeps serving the transport so
        // the UI can surface the failure, but never starts the scan loop.
        error!(error = %err, "engine initialization failed — serving in ERROR state");
    } else {
        info!("engine initialized — STOPPED, awaiting START_BOT");
    }

    let router = transport::build_router(engine.clone());
    let bind_addr = format!("0.0.0.0:{}", env_config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "transport listening");

    let serve = axum::serve(listener, router);

    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                error!(error = %err, "transport server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping gracefully");
        }
    }

    engine.stop_hard().await;
    if let Err(err) = store.close() {
        error!(error = %err, "failed to flush persistence store on shutdown");
    }

    info!("nexus-engine shut down complete");
    Ok(())
}
