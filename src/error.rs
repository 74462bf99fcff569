use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::{BookingStatus, PaymentStatus, UserRole};

/// User-facing error messages shared across handlers and the engine.
pub mod msg {
    pub const BOOKING_NOT_FOUND: &str = "Booking not found";
    pub const PAYMENT_NOT_FOUND: &str = "Payment not found";
    pub const ESCROW_NOT_FOUND: &str = "Escrow record not found";
    pub const WEBHOOK_NOT_FOUND: &str = "No webhook deliveries recorded for this id";
    pub const MALFORMED_ID: &str = "Malformed id in path";

    pub const NOT_A_PARTICIPANT: &str = "Actor is neither the customer nor the provider of this booking";
    pub const NOT_THE_CUSTOMER: &str = "Only the booking's customer can pay for it";
    pub const BOOKING_NOT_CONFIRMED: &str = "Payment can only be initiated for a confirmed booking";
    pub const BOOKING_NOT_COMPLETED: &str = "Escrow can only be released once the booking is completed";

    pub const SCHEDULED_IN_PAST: &str = "Scheduled time must be in the future";
    pub const SCHEDULED_TOO_FAR: &str = "Scheduled time is beyond the booking horizon";
    pub const INVALID_DATE: &str = "scheduled_date must be formatted as YYYY-MM-DD";
    pub const INVALID_TIME: &str = "scheduled_time must be formatted as HH:MM";
    pub const INVALID_AMOUNT: &str = "Amount must be greater than zero";
    pub const INVALID_DURATION: &str = "Duration must be greater than zero";

    pub const WEBHOOK_MISSING_TYPE: &str = "Webhook payload is missing its type";
    pub const WEBHOOK_MISSING_DATA_ID: &str = "Webhook payload is missing data.id";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
}

/// Which refund policy rule blocked a refund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundBlock {
    /// The service is underway or already delivered.
    BookingState(BookingStatus),
    /// Too close to the scheduled time.
    WithinCutoff { hours_until_service: i64, cutoff_hours: i64 },
}

impl std::fmt::Display for RefundBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefundBlock::BookingState(status) => {
                write!(f, "booking is {}, service already started or delivered", status.as_ref())
            }
            RefundBlock::WithinCutoff { hours_until_service, cutoff_hours } => write!(
                f,
                "within {}h cutoff ({}h until scheduled service)",
                cutoff_hours, hours_until_service
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Slot already booked by {booking_id}")]
    SlotTaken { booking_id: String },

    #[error("Payment {payment_id} already exists for this booking")]
    PaymentExists { payment_id: String },

    #[error("Invalid payment transition from {from} to {to}")]
    InvalidTransition { from: PaymentStatus, to: PaymentStatus },

    #[error("Transition from {from} to {to} is not allowed for {role}")]
    ForbiddenTransition {
        from: BookingStatus,
        to: BookingStatus,
        role: UserRole,
    },

    #[error("No held escrow for booking {0}")]
    NoHeldEscrow(String),

    #[error("Escrow for payment {0} was already released")]
    AlreadyReleased(String),

    #[error("Refund blocked: {0}")]
    RefundBlocked(RefundBlock),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Gateway(format!("request timed out: {}", e))
        } else {
            AppError::Gateway(e.to_string())
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for AppError {
    fn from(rejection: axum::extract::rejection::PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::SlotTaken { .. } | AppError::PaymentExists { .. } => {
                (StatusCode::CONFLICT, "Conflict", Some(self.to_string()))
            }
            AppError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "Invalid transition", Some(self.to_string()))
            }
            AppError::ForbiddenTransition { .. } => {
                (StatusCode::FORBIDDEN, "Forbidden transition", Some(self.to_string()))
            }
            AppError::NoHeldEscrow(_) | AppError::AlreadyReleased(_) => {
                (StatusCode::CONFLICT, "Escrow unavailable", Some(self.to_string()))
            }
            AppError::RefundBlocked(block) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Refund not allowed",
                Some(block.to_string()),
            ),
            AppError::Gateway(e) => {
                tracing::warn!("Gateway error: {}", e);
                (StatusCode::BAD_GATEWAY, "Payment gateway unavailable", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Turns `Option` lookups into `NotFound` errors.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}
