use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;

use tandem_gateway::reconcile::page_size;
use tandem_types::api::UpdateProfileRequest;
use tandem_types::error::ChatError;
use tandem_types::models::User;

use crate::auth::AppState;
use crate::error::ApiError;

const MAX_DISPLAY_NAME_CHARS: usize = 64;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub search: Option<String>,
    pub limit: Option<u32>,
}

pub async fn me(Extension(user): Extension<User>) -> impl IntoResponse {
    Json(user)
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateProfileRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let display_name = req.display_name.map(|n| n.trim().to_string());
    if let Some(name) = &display_name {
        if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(ChatError::invalid(format!(
                "display name cannot exceed {MAX_DISPLAY_NAME_CHARS} characters"
            ))
            .into());
        }
    }

    let user_id = user.id;
    let avatar = req.avatar;
    let updated = state
        .dispatcher
        .store()
        .call("update_profile", move |s| {
            s.update_profile(user_id, display_name.as_deref(), avatar.as_deref())
        })
        .await?
        .ok_or_else(|| ChatError::not_found("user not found"))?;

    Ok(Json(updated))
}

/// Verified users other than the caller, optionally filtered by a substring
/// of email or display name.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    WithRejection(Query(query), _): WithRejection<Query<UserQuery>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = user.id;
    let limit = page_size(query.limit);
    let users = state
        .dispatcher
        .store()
        .call("list_users", move |s| {
            s.list_users(caller, query.search.as_deref(), limit)
        })
        .await?;
    Ok(Json(users))
}
