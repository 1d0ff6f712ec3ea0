//! Custom error types for the application using thiserror.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::route::VALID_FORMATS;

/// Custom error types for the application
#[derive(Error, Debug)]
pub enum AppError {
    /// Request path does not match any of the rate routes
    #[error("Invalid parameters: {0}")]
    BadPath(String),

    /// Crypto symbol is not registered
    #[error("Crypto currency {0} is unsupported")]
    UnknownCrypto(String),

    /// Fiat symbol is not registered
    #[error("Fiat currency {0} is unsupported")]
    UnknownFiat(String),

    /// Symbols are valid but there is nothing stored for them
    #[error("Exchange rates not found")]
    NoRates,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A storage call or a whole request did not finish in time
    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Price API answered with something we cannot use
    #[error("Upstream price API error: {0}")]
    Upstream(String),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Middleware failure that is not a timeout
    #[error("Internal error: {0}")]
    Internal(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadPath(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownCrypto(_) | AppError::UnknownFiat(_) | AppError::NoRates => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::BadPath(reason) => format!("{reason}. Valid URL formats: {VALID_FORMATS}"),
            AppError::UnknownCrypto(_) | AppError::UnknownFiat(_) | AppError::NoRates => {
                self.to_string()
            }
            AppError::HttpRequest(_) | AppError::Upstream(_) | AppError::Json(_) => {
                "Upstream price service failure".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
