use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::payload::PayloadError;

/// Identical body for every 403, so callers cannot tell a bad signature from a bad payload.
pub const FORBIDDEN_BODY: &str = "Forbidden";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook could not be authenticated")]
    Unauthenticated,

    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),

    #[error("pull request has no tracked branch")]
    UnknownBranch,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated | Self::InvalidPayload(_) => {
                (StatusCode::FORBIDDEN, FORBIDDEN_BODY).into_response()
            }
            Self::UnknownBranch => {
                (StatusCode::BAD_REQUEST, "Unknown pull request branch").into_response()
            }
            Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}
