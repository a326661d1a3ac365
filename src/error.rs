// =============================================================================
// Engine error kinds — spec.md §7
// =============================================================================
//
// `anyhow::Error` remains the workhorse at I/O boundaries (it's what every
// `reqwest`/`sled` call actually returns, wrapped in `.context(..)`), but
// spec.md §7 names seven error *kinds* the engine itself must branch on —
// to decide a status transition, a log severity, or whether a failure
// aborts just the current action. `EngineError` gives those kinds a type
// the engine can `match` on instead of inspecting a formatted string.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing credentials where the gateway requires them to initialize.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credentials grant withdrawal capability — the security gate in
    /// `ExchangeGateway::validate_api_key_permissions` tripped.
    #[error("credentials permit withdrawal — refusing to start")]
    Permission,

    /// Network/timeout/5xx failure. Non-fatal: log and skip that action.
    #[error("transient gateway failure: {0}")]
    GatewayTransient(#[source] anyhow::Error),

    /// The venue rejected the request itself (invalid order, insufficient
    /// balance). Leaves position state unchanged.
    #[error("gateway rejected the request: {0}")]
    GatewayRejection(#[source] anyhow::Error),

    /// Durable-storage I/O failure. Logged; in-memory state stays
    /// authoritative and a later successful write re-syncs it.
    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),

    /// An active trade has no matching exchange balance — the position is
    /// dropped without a ledger entry.
    #[error("active trade for {symbol} has no matching exchange balance ({reason})")]
    ReconciliationWarning { symbol: String, reason: String },

    /// A computed value (indicator, price) violates a basic sanity check;
    /// the symbol is skipped for this cycle.
    #[error("invariant violated for {symbol}: {reason}")]
    InvariantViolation { symbol: String, reason: String },
}
