use crate::objects::ObjectError;
use crate::storage::StorageError;
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The target existed but can no longer be used (spent or expired capability).
    #[error("gone: {0}")]
    Gone(String),

    #[error("internal error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Gone(m) => (StatusCode::GONE, m.clone()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StorageError::InvalidTransition { .. } | StorageError::Conflict(_) => ApiError::Conflict(e.to_string()),
            StorageError::AlreadyUsed => ApiError::Gone("Form has already been completed".to_string()),
            StorageError::Expired => ApiError::Gone("Form has expired".to_string()),
            StorageError::Database(_) | StorageError::Corrupt(_) => {
                tracing::error!(error = %e, "storage failure");
                ApiError::Internal
            }
        }
    }
}

impl From<zk_claims::ClaimError> for ApiError {
    fn from(e: zk_claims::ClaimError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ObjectError> for ApiError {
    fn from(e: ObjectError) -> Self {
        match e {
            ObjectError::InvalidPath(_) => ApiError::BadRequest(e.to_string()),
            ObjectError::NotFound => ApiError::NotFound("Object not found".to_string()),
            ObjectError::Io(_) => {
                tracing::error!(error = %e, "object store failure");
                ApiError::Internal
            }
        }
    }
}
