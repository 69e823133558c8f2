use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use tandem_types::api::OpenChatRequest;
use tandem_types::models::User;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = state.dispatcher.list_chats(user.id).await?;
    Ok(Json(chats))
}

/// Find or create the chat with `participant_id`. Opening an existing pair
/// returns that same chat.
pub async fn open_chat(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    WithRejection(Json(req), _): WithRejection<Json<OpenChatRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state
        .dispatcher
        .open_chat(user.id, req.participant_id)
        .await?;
    let summary = state.dispatcher.chat_summary(chat.id, user.id).await?;
    Ok(Json(summary))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.dispatcher.chat_summary(chat_id, user.id).await?;
    Ok(Json(summary))
}
