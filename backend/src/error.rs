//! Error handling for the inventory ledger
//!
//! Provides consistent error responses in Thai and English

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{LedgerInvariantError, ProductionValidationError};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_th: String,
    },

    /// A concurrent writer won a lock race; the whole call can be retried
    #[error("Conflict: {message}")]
    Conflict {
        resource: String,
        message: String,
        message_th: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business rule errors
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// Ledger arithmetic or locking broke. Aborts the enclosing transaction.
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    // External service errors
    #[error("{source_name} temporarily unavailable: {message}")]
    ExternalUnavailable {
        source_name: String,
        message: String,
    },

    #[error("External service error: {0}")]
    ExternalService(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[source] sqlx::Error),
}

impl AppError {
    /// Shorthand for a field validation failure
    pub fn validation(field: &str, message: &str, message_th: &str) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.to_string(),
            message_th: message_th.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ExternalUnavailable { .. } | AppError::Conflict { .. }
        )
    }
}

/// SQLSTATEs Postgres raises when it aborts one side of a lock race:
/// deadlock_detected and serialization_failure
pub fn is_lock_conflict(sqlstate: Option<&str>) -> bool {
    matches!(sqlstate, Some("40P01") | Some("40001"))
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let conflict = match &err {
            sqlx::Error::Database(db_err) => is_lock_conflict(db_err.code().as_deref()),
            _ => false,
        };
        if conflict {
            tracing::warn!(error = %err, "transaction aborted by a concurrent writer");
            return AppError::Conflict {
                resource: "inventory_balances".to_string(),
                message: "Stock was updated concurrently, please retry".to_string(),
                message_th: "มีการแก้ไขสต็อกพร้อมกัน กรุณาลองใหม่".to_string(),
            };
        }
        AppError::DatabaseError(err)
    }
}

impl From<LedgerInvariantError> for AppError {
    fn from(err: LedgerInvariantError) -> Self {
        AppError::InvariantViolation(err.to_string())
    }
}

impl From<ProductionValidationError> for AppError {
    fn from(err: ProductionValidationError) -> Self {
        AppError::Validation {
            field: err.field().to_string(),
            message: err.to_string(),
            message_th: err.message_th(),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_th: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl AppError {
    fn status_and_detail(&self) -> (StatusCode, ErrorDetail) {
        let detail = |code: &str, message_en: String, message_th: String, field: Option<String>| {
            ErrorDetail {
                code: code.to_string(),
                message_en,
                message_th,
                field,
                retryable: self.is_retryable(),
            }
        };

        match self {
            AppError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                detail(
                    "TOKEN_EXPIRED",
                    "Token has expired".to_string(),
                    "โทเค็นหมดอายุแล้ว".to_string(),
                    None,
                ),
            ),
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                detail(
                    "INVALID_TOKEN",
                    "Invalid token".to_string(),
                    "โทเค็นไม่ถูกต้อง".to_string(),
                    None,
                ),
            ),
            AppError::Validation {
                field,
                message,
                message_th,
            } => (
                StatusCode::BAD_REQUEST,
                detail(
                    "VALIDATION_ERROR",
                    message.clone(),
                    message_th.clone(),
                    Some(field.clone()),
                ),
            ),
            AppError::Conflict {
                resource,
                message,
                message_th,
            } => (
                StatusCode::CONFLICT,
                detail(
                    "CONFLICT",
                    message.clone(),
                    message_th.clone(),
                    Some(resource.clone()),
                ),
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                detail(
                    "NOT_FOUND",
                    format!("{} not found", resource),
                    format!("ไม่พบ {}", resource),
                    None,
                ),
            ),
            AppError::InsufficientStock(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                detail(
                    "INSUFFICIENT_STOCK",
                    msg.clone(),
                    format!("สต็อกไม่เพียงพอ: {}", msg),
                    None,
                ),
            ),
            AppError::InvariantViolation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                detail(
                    "LEDGER_INVARIANT_VIOLATION",
                    "The ledger rejected an inconsistent write".to_string(),
                    "ระบบบัญชีสต็อกปฏิเสธการบันทึกที่ไม่สอดคล้องกัน".to_string(),
                    None,
                ),
            ),
            AppError::ExternalUnavailable { source_name, .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                detail(
                    "EXTERNAL_UNAVAILABLE",
                    format!("{} is temporarily unavailable, please retry", source_name),
                    format!("{} ไม่พร้อมใช้งานชั่วคราว กรุณาลองใหม่", source_name),
                    None,
                ),
            ),
            AppError::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                detail(
                    "EXTERNAL_SERVICE_ERROR",
                    format!("External service error: {}", msg),
                    format!("เกิดข้อผิดพลาดกับบริการภายนอก: {}", msg),
                    None,
                ),
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                detail(
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    "เกิดข้อผิดพลาดกับฐานข้อมูล".to_string(),
                    None,
                ),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = self.status_and_detail();

        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers and services
pub type AppResult<T> = Result<T, AppError>;
