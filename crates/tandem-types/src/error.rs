use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by the live gateway and the REST fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Bad credential, or acting on a chat the caller is not part of.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Durable store timed out or failed. Retryable by the caller.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    InvalidContent,
    NotFound,
    StoreUnavailable,
}

impl ChatError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidContent(reason.into())
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound(reason.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidContent(_) => ErrorKind::InvalidContent,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// The human-readable reason without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Unauthorized(r)
            | Self::InvalidContent(r)
            | Self::NotFound(r)
            | Self::StoreUnavailable(r) => r,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
