use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use shared::{Envelope, ErrorCategory, ValidationError};
use std::time::Duration;

/// Game-rule refusals of a well-formed request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Invalid bet amount")]
    InvalidBetAmount,

    #[error("Invalid lucky number")]
    InvalidLuckyNumber,

    #[error("No free bet available")]
    NoFreeBet,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Account is self-excluded until {0}")]
    SelfExcluded(DateTime<Utc>),

    #[error("Bet already placed")]
    BetAlreadyPlaced,

    #[error("Payment request declined")]
    PaymentDeclined,

    #[error("Account still holds a balance")]
    AccountHasBalance,

    #[error("A withdrawal is still pending")]
    WithdrawalPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OtpError {
    #[error("OTP has expired")]
    Expired,

    #[error("Invalid OTP")]
    Invalid,

    #[error("No OTP has been requested")]
    Missing,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Rejected(Rejection),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("{0}")]
    Otp(#[from] OtpError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError::InvalidInput(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Redis(_) | AppError::Internal(_) => ErrorCategory::Internal,
            AppError::NotFound(_) | AppError::Rejected(_) => ErrorCategory::Business,
            AppError::InvalidInput(_) | AppError::Otp(_) => ErrorCategory::Validation,
            AppError::InsufficientBalance => ErrorCategory::InsufficientBalance,
            AppError::Unauthorized(_) => ErrorCategory::Unauthorized,
            AppError::Forbidden(_) => ErrorCategory::Forbidden,
            AppError::Timeout(_) => ErrorCategory::Timeout,
        }
    }

    /// Whether a background job hitting this error should try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Redis(_) | AppError::Internal(_) | AppError::Timeout(_)
        )
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Redis(_) | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::InvalidInput(message) => message.clone(),
            AppError::Unauthorized(message) | AppError::Forbidden(message) => message.clone(),
            AppError::Timeout(_) => "Request timed out".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        AppError::Rejected(rejection)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let category = self.category();

        match &self {
            AppError::Redis(e) => tracing::error!("Redis error: {:?}", e),
            AppError::Internal(e) => tracing::error!("Internal error: {:?}", e),
            AppError::Timeout(deadline) => {
                tracing::error!(deadline_ms = deadline.as_millis() as u64, "Request deadline exceeded")
            }
            other => tracing::debug!(category = ?category, error = %other, "Request refused"),
        }

        metrics::counter!("errors_total", "category" => category_label(category)).increment(1);

        let status =
            StatusCode::from_u16(category.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(Envelope::from_category(category, self.client_message()));

        (status, body).into_response()
    }
}

fn category_label(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Validation => "validation",
        ErrorCategory::Business => "business",
        ErrorCategory::InsufficientBalance => "insufficient_balance",
        ErrorCategory::Unauthorized => "unauthorized",
        ErrorCategory::Forbidden => "forbidden",
        ErrorCategory::Timeout => "timeout",
        ErrorCategory::Internal => "internal",
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
