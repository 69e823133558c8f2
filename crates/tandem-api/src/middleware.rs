use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};

use crate::auth::{AppState, authenticate};
use crate::error::ApiError;

/// Require `Authorization: Bearer <token>` resolving to a verified user.
/// The user is inserted into request extensions for the handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.map_err(|_| ApiError::unauthenticated("missing bearer token"))?;

    let user = authenticate(&state, bearer.token()).await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
