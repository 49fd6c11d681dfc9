use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::store::{InviteError, UserStoreError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    ValidationError(String),

    Unauthorized(String),

    Forbidden(String),

    Conflict(String),

    PersistenceError(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::PersistenceError(msg) => write!(f, "Persistence error: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::PersistenceError(msg) => {
                // Storage details stay in the log; clients get a stable code.
                tracing::error!("Persistence error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A storage error occurred".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<UserStoreError> for ApiError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::UsernameTaken => {
                ApiError::Conflict("Username is already taken".to_string())
            }
            UserStoreError::WeakPassword(errors) => ApiError::ValidationError(errors.join(" ")),
            UserStoreError::InvalidUsername(msg) => ApiError::ValidationError(msg),
            UserStoreError::NotFound => ApiError::NotFound("User not found".to_string()),
            UserStoreError::Password(err) => ApiError::InternalError(err.to_string()),
            UserStoreError::Persistence(err) => ApiError::PersistenceError(err.to_string()),
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(err: InviteError) -> Self {
        match err {
            InviteError::InvalidInvite => {
                ApiError::ValidationError("Invite code is invalid".to_string())
            }
            InviteError::InviteUsed => {
                ApiError::Conflict("Invite code has already been used".to_string())
            }
            InviteError::InviteExpired => {
                ApiError::ValidationError("Invite code has expired".to_string())
            }
            InviteError::NotFound => ApiError::NotFound("Invite code not found".to_string()),
            InviteError::Persistence(err) => ApiError::PersistenceError(err.to_string()),
        }
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::InternalError(msg.into())
    }

    /// Uniform 401 for failed logins. The message never distinguishes an
    /// unknown user from a wrong password or a locked account.
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("Invalid credentials".to_string())
    }

    pub fn unauthorized() -> Self {
        ApiError::Unauthorized("Unauthorized".to_string())
    }
}
