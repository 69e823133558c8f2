pub mod config;
pub mod gateway;

use axum::{Json, Router, response::IntoResponse, routing::get};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tandem_api::auth::AppState;

/// Full HTTP surface: REST fallback, the `/gateway` WebSocket upgrade and
/// `/health`.
pub fn app(state: AppState) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(gateway::ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .merge(tandem_api::routes(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}
