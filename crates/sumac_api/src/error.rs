//! Error model shared by the Redmine and Harvest client operations.

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Failure of a single remote call: a non-success HTTP status, rejected credentials, a missing
/// resource, a transport problem, or a payload that could not be (de)serialized.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http {status}: {message}")]
    Http {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },
    #[error("authentication error: {0}")]
    Authentication(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected error: {0}")]
    Other(String),
}

impl ApiError {
    /// Constructs an HTTP error variant with optional API-specific code.
    pub fn http(status: StatusCode, code: Option<String>, message: impl Into<String>) -> Self {
        ApiError::Http {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ApiError::NotFound(_) => true,
            ApiError::Http { status, .. } => *status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }

    /// Whether repeating the same idempotent request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Network(_) => true,
            ApiError::Http { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    /// Converts reqwest errors into semantic ApiError variants.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_status() {
            let status = err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            ApiError::Http {
                status,
                code: None,
                message: err.to_string(),
            }
        } else if err.is_connect() {
            ApiError::Network(err.to_string())
        } else if err.is_decode() {
            ApiError::Serialization(err.to_string())
        } else {
            ApiError::Other(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}
