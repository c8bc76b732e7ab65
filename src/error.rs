use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Every failure a handler can report. Client errors carry a readable
/// message; `Internal` is logged and rendered as a generic 500.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    MissingField(&'static str),
    #[error("Password must be at least 8 characters")]
    WeakPassword,
    #[error("User already exists")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid user data")]
    InvalidUserData,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("User not found")]
    UserNotFound,
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField(_)
            | Self::WeakPassword
            | Self::DuplicateEmail
            | Self::InvalidCredentials
            | Self::InvalidUserData => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(e) => {
                error!(error = ?e, "request failed");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
