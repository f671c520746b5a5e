use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failure reported by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A unique constraint (ticket number, customer phone, upstream message id) was hit.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::UniqueViolation(
                    db_err.constraint().unwrap_or("unique").to_string(),
                );
            }
        }
        StoreError::Backend(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Outbound provider call failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("messenger misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Request(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DeskError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl DeskError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeskError::Validation { .. } | DeskError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DeskError::NotFound(_) => StatusCode::NOT_FOUND,
            DeskError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DeskError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "something went wrong, please try again".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404_with_message() {
        let err = DeskError::NotFound("ticket".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "ticket not found");
    }

    #[test]
    fn storage_errors_do_not_leak_detail() {
        let err = DeskError::from(StoreError::Backend("relation tickets missing".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_error_names_field() {
        let err = DeskError::Validation {
            field: "amount".to_string(),
            reason: "must be a number".to_string(),
        };
        assert_eq!(err.to_string(), "invalid amount: must be a number");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
