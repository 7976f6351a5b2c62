use std::collections::BTreeMap;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::users::repo::UserError;

/// Field name -> human readable problem.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error(transparent)]
    User(#[from] UserError),
    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl ApiError {
    /// Stable machine-readable code sent as `error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Validation(_) => "validation_error",
            Self::User(UserError::InvalidId) => "invalid_id",
            Self::User(UserError::NotFound) => "not_found",
            Self::User(UserError::InvalidEmail) => "invalid_email",
            Self::User(UserError::InvalidName) => "invalid_name",
            Self::User(UserError::EmailExists) => "duplicate_email",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::User(UserError::InvalidId)
            | Self::User(UserError::InvalidEmail)
            | Self::User(UserError::InvalidName) => StatusCode::BAD_REQUEST,
            Self::User(UserError::NotFound) => StatusCode::NOT_FOUND,
            Self::User(UserError::EmailExists) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::User(UserError::InvalidId) => "User ID is required".into(),
            Self::User(UserError::NotFound) => "User not found".into(),
            Self::User(UserError::InvalidEmail) => "Invalid email address".into(),
            Self::User(UserError::InvalidName) => "Name is required".into(),
            Self::User(UserError::EmailExists) => "Email already exists".into(),
            Self::Validation(_) => "Validation failed".into(),
            // never leak internals to clients
            Self::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge;
        }
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "request failed");
        }
        let message = self.message();
        let body = ErrorBody {
            error: self.code(),
            message: &message,
            fields: match &self {
                Self::Validation(fields) => Some(fields),
                _ => None,
            },
            retry_after: match &self {
                Self::RateLimited { retry_after } => Some(*retry_after),
                _ => None,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
