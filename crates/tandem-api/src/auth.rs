use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use tandem_gateway::Dispatcher;
use tandem_types::api::Claims;
use tandem_types::models::User;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

/// Sign a bearer credential for `user`, valid for `ttl`.
pub fn issue_token(secret: &str, user: &User, ttl: Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Check signature and expiry. Says nothing about whether the user exists.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        ApiError::unauthenticated("invalid or expired token")
    })
}

/// Resolve a bearer credential to a verified user. Used by the REST
/// middleware and the gateway handshake alike.
pub async fn authenticate(state: &AppStateInner, token: &str) -> Result<User, ApiError> {
    let claims = verify_token(&state.jwt_secret, token)?;

    let user_id = claims.sub;
    let user = state
        .dispatcher
        .store()
        .call("get_user", move |s| s.get_user(user_id))
        .await?
        .ok_or_else(|| ApiError::unauthenticated("user no longer exists"))?;

    if !user.is_verified {
        return Err(ApiError::unauthenticated("user is not verified"));
    }
    Ok(user)
}
