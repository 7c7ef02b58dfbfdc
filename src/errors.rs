use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// A ledger mutation would break counter ordering or drive a counter
    /// negative. Carries the offending counter and values for diagnostics.
    #[error("Invariant violation on line {line_id}: {detail}")]
    InvariantViolation { line_id: Uuid, detail: String },

    /// Illegal state-machine action for the record's current status.
    #[error("Invalid transition: cannot {action} record {record_id} in status {status}")]
    InvalidTransition {
        record_id: Uuid,
        action: String,
        status: String,
    },

    /// QC rejection exceeds what was achieved.
    #[error(
        "Invalid quantity: cannot reject {rejected_delta} on line {line_id}, only {achieved} achieved"
    )]
    InvalidQuantity {
        line_id: Uuid,
        rejected_delta: i32,
        achieved: i32,
    },

    /// A quantity update would push achieved past planned.
    #[error(
        "Quantity exceeded on line {line_id}: achieved {achieved} + delta {delta} passes planned {planned}"
    )]
    QuantityExceeded {
        line_id: Uuid,
        planned: i32,
        achieved: i32,
        delta: i32,
    },

    /// Pack request exceeds the packable remainder (achieved - packed).
    #[error(
        "Insufficient achieved quantity on line {line_id}: requested {requested}, packable {available}"
    )]
    InsufficientAchievedQuantity {
        line_id: Uuid,
        requested: i32,
        available: i32,
    },

    /// No group key in the dispatch request could be satisfied at all.
    #[error("Nothing to dispatch for work order {work_order_id}")]
    NothingToDispatch { work_order_id: Uuid },

    /// Optimistic version mismatch; the whole operation is safe to retry.
    #[error("Concurrent modification of {entity} {id}")]
    ConcurrencyConflict { entity: &'static str, id: String },
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// True for errors that a bounded whole-operation retry may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::ConcurrencyConflict { .. })
    }

    /// Returns the HTTP status code for this error.
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_)
            | Self::InvalidTransition { .. }
            | Self::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            Self::InvariantViolation { .. }
            | Self::InvalidQuantity { .. }
            | Self::QuantityExceeded { .. }
            | Self::InsufficientAchievedQuantity { .. }
            | Self::NothingToDispatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Returns the message suitable for HTTP responses. Internal errors get a
    /// generic message; business-rule errors surface verbatim with their
    /// quantities so callers can show actionable diagnostics.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
