/// Shared error classification and the uniform response envelope
///
/// Design Philosophy:
/// - Every failure belongs to exactly one category
/// - A category determines the HTTP status, the application `StatusCode`
///   carried in the envelope, and the log severity
/// - The application code is deliberately independent of the HTTP status:
///   clients key their behaviour off `StatusCode`
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error categories that map to HTTP status codes and logging severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Malformed input the client must fix (400)
    Validation,

    /// Well-formed request refused by a game rule (202)
    /// Wrong bet amount, bad lucky number, game not found, self-excluded
    Business,

    /// Business rejection with its own application code (202)
    InsufficientBalance,

    /// Missing or invalid credentials (401)
    Unauthorized,

    /// Caller not allowed to reach the endpoint at all (403)
    Forbidden,

    /// Caller deadline expired before the reads completed (504)
    Timeout,

    /// Persistence or downstream failure (500)
    Internal,
}

impl ErrorCategory {
    /// Map error category to HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::Business => 202,
            ErrorCategory::InsufficientBalance => 202,
            ErrorCategory::Unauthorized => 401,
            ErrorCategory::Forbidden => 403,
            ErrorCategory::Timeout => 504,
            ErrorCategory::Internal => 500,
        }
    }

    /// Map error category to the application code carried in the envelope
    pub fn app_code(&self) -> AppCode {
        match self {
            ErrorCategory::InsufficientBalance => AppCode::INSUFFICIENT_BALANCE,
            ErrorCategory::Timeout | ErrorCategory::Internal => AppCode::SERVICE_ERROR,
            _ => AppCode::BUSINESS_FAILURE,
        }
    }

    /// Map error category to log level
    pub fn log_level(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "warn",
            ErrorCategory::Business => "info",
            ErrorCategory::InsufficientBalance => "info",
            ErrorCategory::Unauthorized => "warn",
            ErrorCategory::Forbidden => "warn",
            ErrorCategory::Timeout => "error",
            ErrorCategory::Internal => "error",
        }
    }
}

/// Application status code carried in `StatusCode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppCode(pub u8);

impl AppCode {
    pub const OK: AppCode = AppCode(0);
    pub const BUSINESS_FAILURE: AppCode = AppCode(1);
    pub const SERVICE_ERROR: AppCode = AppCode(2);
    pub const INSUFFICIENT_BALANCE: AppCode = AppCode(3);
}

impl fmt::Display for AppCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Uniform response envelope: `{Status, StatusCode, StatusMessage}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Status")]
    pub status: u16,

    #[serde(rename = "StatusCode")]
    pub status_code: AppCode,

    #[serde(rename = "StatusMessage")]
    pub status_message: String,
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_code: AppCode::OK,
            status_message: message.into(),
        }
    }

    pub fn from_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            status: category.http_status(),
            status_code: category.app_code(),
            status_message: message.into(),
        }
    }
}
