use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use serde::Deserialize;
use tracing::warn;

use tandem_api::auth::{AppState, authenticate};
use tandem_api::error::ApiError;
use tandem_gateway::connection;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// Verify the credential before upgrading. A rejected handshake gets a
/// plain 401 and no session is ever created.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = match (query.token, bearer) {
        (Some(token), _) => token,
        (None, Ok(TypedHeader(Authorization(bearer)))) => bearer.token().to_string(),
        (None, Err(_)) => return Err(ApiError::unauthenticated("missing token")),
    };

    let user = authenticate(&state, &token).await.inspect_err(|e| {
        warn!("Gateway handshake rejected: {}", e);
    })?;

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, user)))
}
