// =============================================================================
// REST — plain liveness probe
// =============================================================================

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
}

/// `GET /health` — teacher precedent: `api/rest.rs`'s `health` endpoint.
pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}
