//! Error type surfaced by the weather client and the request governor.
//!
//! Every upstream failure is folded into [`ApiError`]. Only
//! [`ApiError::RateLimited`] is retried by the governor; everything else
//! reaches the caller unchanged.

use serde::Deserialize;
use thiserror::Error;

/// Upstream error code for "No matching location found" (sent with HTTP 400).
pub const NO_MATCHING_LOCATION_CODE: i64 = 1006;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Invalid API key: {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Location not found: {message}")]
    NotFound { status: u16, message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    #[error("Weather service unavailable ({status}): {message}")]
    ServerUnavailable { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("No internet connection: {0}")]
    Offline(String),

    #[error("{message}")]
    Generic {
        status: Option<u16>,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    /// Generic error with no HTTP status.
    pub fn message(msg: impl Into<String>) -> Self {
        ApiError::Generic {
            status: None,
            message: msg.into(),
        }
    }

    /// Classify a non-success HTTP response.
    ///
    /// `body` is the raw response text; when it carries the provider's
    /// `{"error": {"code", "message"}}` envelope, its message is kept.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let code = parsed.as_ref().and_then(|e| e.error.code);
        let upstream = parsed.and_then(|e| e.error.message);
        let message = |fallback: &str| upstream.clone().unwrap_or_else(|| fallback.to_string());

        match status {
            401 => ApiError::Unauthorized {
                status,
                message: message("API key is missing or invalid"),
            },
            404 => ApiError::NotFound {
                status,
                message: message("Requested location was not found"),
            },
            400 if code == Some(NO_MATCHING_LOCATION_CODE) => ApiError::NotFound {
                status,
                message: message("No matching location found"),
            },
            429 => ApiError::RateLimited {
                message: message("Too many requests"),
            },
            s if s >= 500 => ApiError::ServerUnavailable {
                status,
                message: message("Upstream service error"),
            },
            _ => ApiError::Generic {
                status: Some(status),
                message: message(&format!("Request failed with status {}", status)),
            },
        }
    }

    /// HTTP status mirrored by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { status, .. }
            | ApiError::NotFound { status, .. }
            | ApiError::ServerUnavailable { status, .. } => Some(*status),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Generic { status, .. } => *status,
            ApiError::Timeout | ApiError::Offline(_) => None,
        }
    }

    /// Whether the governor should retry this failure with backoff.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::Unauthorized { .. } => "Weather API key is invalid. Check settings.",
            ApiError::NotFound { .. } => "Location not found. Check and try again.",
            ApiError::RateLimited { .. } => {
                "Too many weather requests. Please wait a moment and try again."
            }
            ApiError::ServerUnavailable { .. } => {
                "Weather service unavailable. Please try again later."
            }
            ApiError::Timeout => "The request timed out. Please try again.",
            ApiError::Offline(_) => "Unable to connect. Check your internet connection.",
            ApiError::Generic { .. } => "Weather service error. Please try again.",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_connect() {
            ApiError::Offline(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::from_status(status.as_u16(), "")
        } else if e.is_decode() {
            ApiError::message(format!("Invalid response: {}", e))
        } else {
            ApiError::message(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::message(format!("Invalid response: {}", e))
    }
}
