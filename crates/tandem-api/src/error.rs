use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use tandem_types::api::ErrorBody;
use tandem_types::error::{ChatError, ErrorKind};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed, expired or unverified credential.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl ApiError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Chat(ChatError::Unauthorized(_)) => StatusCode::FORBIDDEN,
            Self::Chat(ChatError::InvalidContent(_)) => StatusCode::BAD_REQUEST,
            Self::Chat(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Chat(ChatError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Unauthenticated(reason) => ErrorBody {
                error: ErrorKind::Unauthorized,
                message: reason.clone(),
            },
            Self::Chat(e) => ErrorBody {
                error: e.kind(),
                message: e.reason().to_string(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Chat(ChatError::invalid(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Chat(ChatError::invalid(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
