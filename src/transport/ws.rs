// =============================================================================
// WebSocket Handler — push channel the UI speaks (spec.md §4.G / §6)
// =============================================================================
//
// A single `/ws` connection: send `initial_state` immediately, then relay
// every `EventBus` channel as its own typed frame, while concurrently reading
// inbound `{"type":"command",...}` / `{"type":"settings",...}` text frames
// and dispatching them 1:1 onto `Engine` methods. Grounded on the teacher's
// `api/ws.rs` split-sink/stream `tokio::select!` loop and its Ping/Pong
// handling; generalized from a single version-polling snapshot to the five
// typed `EventBus` channels this spec defines.
// =============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{BotLog, Coin, CompletedTrade, Settings, Status};
use crate::events::{recv_or_disconnect, BroadcastPoll, PortfolioSnapshot};

use super::AppState;

/// Outbound frames, tagged by `type` exactly as spec.md §6 enumerates them.
#[derive(Serialize)]
#[serde(tag = "type")]
enum OutboundEvent<'a> {
    #[serde(rename = "initial_state")]
    InitialState { payload: &'a crate::events::InitialState },
    #[serde(rename = "status")]
    Status { status: Status },
    #[serde(rename = "log")]
    Log { payload: BotLog },
    #[serde(rename = "market_update_full")]
    MarketUpdateFull { payload: Vec<Coin> },
    #[serde(rename = "portfolio_update")]
    PortfolioUpdate { portfolio: Vec<PortfolioItemWire>, usdt_balance: f64 },
    #[serde(rename = "trade_ledger_update")]
    TradeLedgerUpdate { payload: Vec<CompletedTrade> },
}

/// `PortfolioSnapshot` flattened into the wire shape spec.md §6 asks for.
#[derive(Serialize)]
struct PortfolioItemWire(crate::domain::PortfolioItem);

/// Inbound command/settings frames the UI may send.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum InboundMessage {
    #[serde(rename = "command")]
    Command { command: Command },
    #[serde(rename = "settings")]
    Settings { payload: Settings },
}

#[derive(Deserialize)]
enum Command {
    #[serde(rename = "START_BOT")]
    Start,
    #[serde(rename = "STOP_BOT")]
    Stop,
    #[serde(rename = "KILL_SWITCH")]
    KillSwitch,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let initial_state = state.engine.build_initial_state().await;
    let mut sub = state.engine.bus().subscribe(initial_state);

    let (mut sender, mut receiver) = socket.split();

    let initial = OutboundEvent::InitialState { payload: &sub.initial_state };
    if let Err(err) = send(&mut sender, &initial).await {
        warn!(error = %err, "failed to send initial_state — dropping connection");
        return;
    }

    loop {
        tokio::select! {
            changed = sub.status.changed() => {
                if changed.is_err() { break; }
                let status = *sub.status.borrow();
                if send(&mut sender, &OutboundEvent::Status { status }).await.is_err() { break; }
            }
            changed = sub.market.changed() => {
                if changed.is_err() { break; }
                let payload = sub.market.borrow().clone();
                if send(&mut sender, &OutboundEvent::MarketUpdateFull { payload }).await.is_err() { break; }
            }
            changed = sub.portfolio.changed() => {
                if changed.is_err() { break; }
                let PortfolioSnapshot { portfolio, usdt_balance } = sub.portfolio.borrow().clone();
                let wire = portfolio.into_iter().map(PortfolioItemWire).collect();
                if send(&mut sender, &OutboundEvent::PortfolioUpdate { portfolio: wire, usdt_balance }).await.is_err() { break; }
            }
            log_poll = recv_or_disconnect(&mut sub.log, "log") => {
                match log_poll {
                    BroadcastPoll::Item(payload) => {
                        if send(&mut sender, &OutboundEvent::Log { payload }).await.is_err() { break; }
                    }
                    BroadcastPoll::Disconnected => break,
                }
            }
            ledger_poll = recv_or_disconnect(&mut sub.ledger, "ledger") => {
                match ledger_poll {
                    BroadcastPoll::Item(trade) => {
                        let payload = vec![trade];
                        if send(&mut sender, &OutboundEvent::TradeLedgerUpdate { payload }).await.is_err() { break; }
                    }
                    BroadcastPoll::Disconnected => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_inbound(&text, &state).await,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() { break; }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("websocket connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "websocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }
}

async fn send(
    sender: &mut (impl futures_util::Sink<Message, Error = axum::Error> + Unpin),
    event: &OutboundEvent<'_>,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(err) => {
            warn!(error = %err, "failed to serialise outbound event — skipping, not disconnecting");
            Ok(())
        }
    }
}

/// Unknown commands are logged and ignored per spec.md §4.G; the transport
/// itself never performs domain logic beyond this 1:1 dispatch.
async fn handle_inbound(text: &str, state: &AppState) {
    let parsed: Result<InboundMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(InboundMessage::Command { command: Command::Start }) => state.engine.start().await,
        Ok(InboundMessage::Command { command: Command::Stop }) => state.engine.stop().await,
        Ok(InboundMessage::Command { command: Command::KillSwitch }) => state.engine.stop_hard().await,
        Ok(InboundMessage::Settings { payload }) => {
            if let Err(err) = state.engine.update_settings(payload).await {
                warn!(error = %err, "rejected settings update — invariant violated");
            }
        }
        Err(err) => debug!(error = %err, raw = text, "ignoring unparseable inbound frame"),
    }
}
