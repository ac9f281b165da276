use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned for every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "message": "Insufficient stock for Maize flour. Available: 2",
    "details": null,
    "request_id": "3f0e1c9a-8d8e-4a8b-9b3c-1d2f3a4b5c6d",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Unprocessable Entity")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier echoed from the `x-request-id` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp of the failure
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for {product}. Available: {available}")]
    InsufficientStock { product: String, available: i32 },

    #[error("{0} is display-only and cannot be ordered")]
    ProductNotPurchasable(String),

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    #[error("Coupon is not active: {0}")]
    CouponInactive(String),

    #[error("Cart not found or already paid: {0}")]
    CartNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Amount mismatch: expected {expected}, gateway reported {reported}")]
    AmountMismatch { expected: Decimal, reported: Decimal },

    #[error("Payment already processed: {0}")]
    PaymentAlreadyProcessed(String),

    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// True when the database refused a write because a unique index already holds the key.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::ValidationError(rejection.body_text())
    }
}

impl ServiceError {
    pub fn insufficient_stock(product: impl Into<String>, available: i32) -> Self {
        ServiceError::InsufficientStock {
            product: product.into(),
            available,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_)
            | Self::EmptyCart
            | Self::ProductNotPurchasable(_)
            | Self::CouponNotFound(_)
            | Self::CouponInactive(_)
            | Self::CartNotFound(_)
            | Self::AmountMismatch { .. }
            | Self::PaymentVerificationFailed(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock { .. } | Self::InvalidStatusTransition { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidSignature | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PaymentAlreadyProcessed(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Gateway and internal errors return generic messages; the detail is logged.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::GatewayUnavailable(_) => {
                "Payment service is temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Stable machine-readable code, used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::ValidationError(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::EmptyCart => "empty_cart",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ProductNotPurchasable(_) => "product_not_purchasable",
            Self::CouponNotFound(_) => "coupon_not_found",
            Self::CouponInactive(_) => "coupon_inactive",
            Self::CartNotFound(_) => "cart_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::AmountMismatch { .. } => "amount_mismatch",
            Self::PaymentAlreadyProcessed(_) => "payment_already_processed",
            Self::PaymentVerificationFailed(_) => "payment_verification_failed",
            Self::InvalidSignature => "invalid_signature",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
