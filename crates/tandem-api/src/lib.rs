//! Pull-based fallback over HTTP. Every route requires a bearer credential
//! and goes through the same dispatcher as the live gateway.

pub mod auth;
pub mod chats;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod users;

use axum::{
    Router, middleware as layers,
    routing::{get, put},
};

use crate::auth::AppState;

/// Authenticated REST routes. The caller merges these into the server
/// router and adds the HTTP-wide layers.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chats", get(chats::list_chats).post(chats::open_chat))
        .route("/chats/{chat_id}", get(chats::get_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/chats/{chat_id}/seen", put(messages::mark_seen))
        .route("/users", get(users::search_users))
        .route("/users/me", get(users::me).patch(users::update_me))
        .layer(layers::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
