use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use tandem_types::api::{MarkSeenResponse, SendMessageRequest};
use tandem_types::models::User;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u32>,
    /// Cursor: the `created_at` of the oldest message from the previous page.
    pub before: Option<DateTime<Utc>>,
}

/// History page, ascending. Reading does not mark anything seen.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    WithRejection(Query(query), _): WithRejection<Query<MessageQuery>, ApiError>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .dispatcher
        .list_messages(chat_id, user.id, query.before, query.limit)
        .await?;
    Ok(Json(page))
}

/// Same pipeline as the live path, so room members get it pushed too.
pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(user): Extension<User>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .dispatcher
        .send_message(user.id, chat_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_seen(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let marked_count = state.dispatcher.mark_seen(chat_id, user.id, None).await?;
    debug!("{} marked {} messages seen over REST", user.email, marked_count);
    Ok(Json(MarkSeenResponse { marked_count }))
}
