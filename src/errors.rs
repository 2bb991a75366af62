use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error body returned by every handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Human-readable description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Error taxonomy of the settlement engine.
///
/// `ValidationError` is malformed input and never retried; `Conflict`,
/// `InvalidTransition`, `InsufficientStock` and `InsufficientFunds` are
/// surfaced to the caller without automatic retry; `DatabaseError` covers the
/// transient infrastructure class — safe to retry because ledger and
/// inventory mutations are idempotent under their keys.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Insufficient funds: balance {balance}, attempted debit {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("Invalid or expired discount code: {0}")]
    InvalidCode(String),

    #[error("Minimum order amount of {required} not met, short by {shortfall}")]
    MinimumNotMet { required: Decimal, shortfall: Decimal },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_)
            | ServiceError::InvalidCode(_)
            | ServiceError::MinimumNotMet { .. } => StatusCode::BAD_REQUEST,
            ServiceError::InvalidTransition(_)
            | ServiceError::Conflict(_)
            | ServiceError::InsufficientStock(_) => StatusCode::CONFLICT,
            ServiceError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message exposed to clients. Infrastructure details stay in the logs.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}
