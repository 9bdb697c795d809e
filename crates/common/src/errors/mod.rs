//! Error types for T513 services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for every donation lifecycle failure
//! - A coarse `ErrorKind` taxonomy callers can branch on
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    NoActiveCode,
    InvalidCode,

    // Authentication errors (2xxx)
    Unauthorized,
    InvalidToken,
    ExpiredToken,

    // Authorization errors (3xxx)
    Forbidden,

    // Resource errors (4xxx)
    NotFound,
    NoActiveSession,

    // Conflict errors (5xxx)
    Conflict,
    SessionAlreadyRunning,
    AlreadyInQueue,
    NotInQueue,
    QueueClosed,
    QueuePaused,
    QueueAlreadyStopped,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::NoActiveCode => 1003,
            ErrorCode::InvalidCode => 1004,

            ErrorCode::Unauthorized => 2001,
            ErrorCode::InvalidToken => 2002,
            ErrorCode::ExpiredToken => 2003,

            ErrorCode::Forbidden => 3001,

            ErrorCode::NotFound => 4001,
            ErrorCode::NoActiveSession => 4002,

            ErrorCode::Conflict => 5001,
            ErrorCode::SessionAlreadyRunning => 5002,
            ErrorCode::AlreadyInQueue => 5003,
            ErrorCode::NotInQueue => 5004,
            ErrorCode::QueueClosed => 5005,
            ErrorCode::QueuePaused => 5006,
            ErrorCode::QueueAlreadyStopped => 5007,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Coarse failure taxonomy shared by every lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Authorization,
    Storage,
    Internal,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("No active code")]
    NoActiveCode,

    #[error("Invalid code")]
    InvalidCode,

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("No donation session is running")]
    NoActiveSession,

    // Conflict errors
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("A donation session is already in progress")]
    SessionAlreadyRunning,

    #[error("You are already in the queue")]
    AlreadyInQueue,

    #[error("You are not in the queue")]
    NotInQueue,

    #[error("The queue has been stopped")]
    QueueClosed,

    #[error("The queue is paused")]
    QueuePaused,

    #[error("The queue was already stopped")]
    QueueAlreadyStopped,

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::NoActiveCode => ErrorCode::NoActiveCode,
            AppError::InvalidCode => ErrorCode::InvalidCode,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::NoActiveSession => ErrorCode::NoActiveSession,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::SessionAlreadyRunning => ErrorCode::SessionAlreadyRunning,
            AppError::AlreadyInQueue => ErrorCode::AlreadyInQueue,
            AppError::NotInQueue => ErrorCode::NotInQueue,
            AppError::QueueClosed => ErrorCode::QueueClosed,
            AppError::QueuePaused => ErrorCode::QueuePaused,
            AppError::QueueAlreadyStopped => ErrorCode::QueueAlreadyStopped,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Map this error onto the lifecycle failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound { .. } | AppError::NoActiveSession => ErrorKind::NotFound,

            AppError::Conflict { .. }
            | AppError::SessionAlreadyRunning
            | AppError::AlreadyInQueue
            | AppError::NotInQueue
            | AppError::QueueClosed
            | AppError::QueuePaused
            | AppError::QueueAlreadyStopped => ErrorKind::Conflict,

            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::NoActiveCode
            | AppError::InvalidCode
            | AppError::RateLimited { .. } => ErrorKind::Validation,

            AppError::Unauthorized { .. }
            | AppError::InvalidToken
            | AppError::ExpiredToken
            | AppError::Forbidden { .. } => ErrorKind::Authorization,

            AppError::Database(_) | AppError::DatabaseConnection { .. } => ErrorKind::Storage,

            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::NoActiveCode
            | AppError::InvalidCode => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } | AppError::InvalidToken | AppError::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } | AppError::NoActiveSession => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict { .. }
            | AppError::SessionAlreadyRunning
            | AppError::AlreadyInQueue
            | AppError::NotInQueue
            | AppError::QueueClosed
            | AppError::QueuePaused
            | AppError::QueueAlreadyStopped => StatusCode::CONFLICT,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 503 Service Unavailable
            AppError::DatabaseConnection { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Translate a unique-constraint violation into `conflict`, passing any
    /// other database error through unchanged.
    pub fn from_unique_violation(err: DbErr, conflict: AppError) -> AppError {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                tracing::debug!(detail = %detail, "Unique constraint violated");
                conflict
            }
            _ => AppError::Database(err),
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();
        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            AppError::MissingField { field } => Some(field.clone()),
            _ => None,
        };

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
