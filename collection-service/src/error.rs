//! Business failures reported by the collection core.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use service_core::error::{AppError, RETRY_AFTER_SECS};

use crate::models::TokenStateError;

/// Broad class of a failure, used by callers to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Something the request pointed at does not exist.
    NotFound,
    /// State changed under the caller; re-fetch and retry with corrected input.
    Conflict,
    /// The duplicate guard refused the collection outright.
    PolicyBlocked,
    /// The request itself is malformed. Rejected before any transaction.
    Invalid,
    /// Storage trouble (lock timeout, connectivity). Retry later.
    Transient,
}

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("Vehicle {0} not found")]
    VehicleNotFound(String),

    #[error("Movement {0} not found")]
    MovementNotFound(i64),

    #[error("Tax not configured for car type {car_type_id} and movement {movement_id}")]
    TaxNotConfigured { car_type_id: i64, movement_id: i64 },

    #[error("Receipt reference '{0}' does not exist")]
    ReferenceInvalid(String),

    #[error("Receipt reference '{0}' has already been used")]
    ReferenceUsed(String),

    #[error("Receipt reference '{0}' has been cancelled")]
    ReferenceCancelled(String),

    #[error("Receipt reference '{0}' already exists")]
    ReferenceExists(String),

    #[error("Receipt token {0} not found")]
    TokenNotFound(i64),

    #[error("Receipt token {0} has already been used")]
    TokenAlreadyUsed(i64),

    #[error("Receipt token {0} has already been cancelled")]
    TokenAlreadyCancelled(i64),

    #[error("Duplicate payment blocked: the same tax was collected at {last_payment_at}")]
    DuplicateBlocked { last_payment_at: DateTime<Utc> },

    #[error("Payment {0} not found")]
    PaymentNotFound(i64),

    #[error("Payment {0} has already been reverted")]
    AlreadyReverted(i64),

    #[error("A reason is required to revert a payment")]
    ReasonRequired,

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Request timed out waiting for the store")]
    Timeout,

    #[error("Storage failure: {0}")]
    Storage(#[from] AppError),
}

impl CollectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::VehicleNotFound(_)
            | Self::MovementNotFound(_)
            | Self::TaxNotConfigured { .. }
            | Self::ReferenceInvalid(_)
            | Self::TokenNotFound(_)
            | Self::PaymentNotFound(_) => ErrorKind::NotFound,
            Self::ReferenceUsed(_)
            | Self::ReferenceCancelled(_)
            | Self::ReferenceExists(_)
            | Self::TokenAlreadyUsed(_)
            | Self::TokenAlreadyCancelled(_)
            | Self::AlreadyReverted(_) => ErrorKind::Conflict,
            Self::DuplicateBlocked { .. } => ErrorKind::PolicyBlocked,
            Self::ReasonRequired | Self::InvalidInput(_) | Self::Validation(_) => {
                ErrorKind::Invalid
            }
            Self::Timeout | Self::Storage(_) => ErrorKind::Transient,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::VehicleNotFound(_) => "VEHICLE_NOT_FOUND",
            Self::MovementNotFound(_) => "MOVEMENT_NOT_FOUND",
            Self::TaxNotConfigured { .. } => "TAX_NOT_CONFIGURED",
            Self::ReferenceInvalid(_) => "REFERENCE_INVALID",
            Self::ReferenceUsed(_) => "REFERENCE_USED",
            Self::ReferenceCancelled(_) => "REFERENCE_CANCELLED",
            Self::ReferenceExists(_) => "REFERENCE_EXISTS",
            Self::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            Self::TokenAlreadyUsed(_) => "TOKEN_ALREADY_USED",
            Self::TokenAlreadyCancelled(_) => "TOKEN_ALREADY_CANCELLED",
            Self::DuplicateBlocked { .. } => "DUPLICATE_BLOCKED",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::AlreadyReverted(_) => "ALREADY_REVERTED",
            Self::ReasonRequired => "REASON_REQUIRED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Storage(_) => "STORAGE_UNAVAILABLE",
        }
    }

    /// Map a failed token transition during collection onto the reference it
    /// was looked up by.
    pub fn from_consume(reference: &str, err: TokenStateError) -> Self {
        match err {
            TokenStateError::Cancelled | TokenStateError::AlreadyCancelled => {
                Self::ReferenceCancelled(reference.to_string())
            }
            TokenStateError::AlreadyUsed | TokenStateError::NotInUse => {
                Self::ReferenceUsed(reference.to_string())
            }
        }
    }

    /// Map a failed cancellation onto the token id.
    pub fn from_cancel(token_id: i64, err: TokenStateError) -> Self {
        match err {
            TokenStateError::AlreadyUsed | TokenStateError::NotInUse => {
                Self::TokenAlreadyUsed(token_id)
            }
            TokenStateError::Cancelled | TokenStateError::AlreadyCancelled => {
                Self::TokenAlreadyCancelled(token_id)
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::PolicyBlocked => StatusCode::CONFLICT,
            ErrorKind::Invalid => match self {
                Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_REQUEST,
            },
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CollectionError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Storage details stay in the logs.
        let message = match &self {
            Self::Storage(err) => {
                tracing::error!(error = %err, "Storage failure");
                "Storage temporarily unavailable, retry later".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "status": "error",
            "code": self.code(),
            "message": message,
        });
        if let Self::DuplicateBlocked { last_payment_at } = &self {
            body["last_payment_at"] = json!(last_payment_at);
        }

        let mut res = (status, Json(body)).into_response();
        if self.kind() == ErrorKind::Transient {
            res.headers_mut()
                .insert(header::RETRY_AFTER, RETRY_AFTER_SECS.into());
        }
        res
    }
}
