use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Required input missing or malformed; raised before any network call.
    Validation(String),
    /// Backend answered with a non-2xx status.
    ///
    /// `message` is already normalized: the JSON `detail` field, else the raw
    /// body text, else `HTTP <status>`.
    Http {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Normalized error message.
        message: String,
    },
    /// Request aborted by the client-side timeout.
    Timeout,
    /// Connection-level failure (DNS, refused, reset...).
    Transport(String),
    /// Backend answered 2xx but the payload could not be decoded.
    InvalidResponse(String),
    /// The request succeeded but returned nothing to act on.
    EmptyResult(String),
    /// Operation needs a bearer token and none is held.
    Unauthorized(String),
    /// Key/value storage failure.
    Storage(String),
    /// Local filesystem failure (exports).
    Io(std::io::Error),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Innermost error, skipping any context wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the HTTP status if this (or the wrapped) error came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            AppError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), AppError::Timeout)
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    ///
    /// Backend errors display the normalized message alone, since that is what
    /// the user sees in the error banner.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "{}", msg),
            AppError::Http { message, .. } => write!(f, "{}", message),
            AppError::Timeout => write!(f, "Timeout"),
            AppError::Transport(msg) => write!(f, "Connection error: {}", msg),
            AppError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            AppError::EmptyResult(msg) => write!(f, "{}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Io(e) => write!(f, "I/O error: {}", e),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(e) => Some(e),
            AppError::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response for the dev proxy.
    ///
    /// Upstream failures map to 502/504; everything else is a local fault.
    fn into_response(self) -> Response {
        let (status, error_message) = match self.root() {
            AppError::Transport(msg) => {
                tracing::error!("Upstream unreachable: {}", msg);
                (StatusCode::BAD_GATEWAY, "Upstream unreachable".to_string())
            }
            AppError::Timeout => {
                tracing::warn!("Upstream timed out");
                (StatusCode::GATEWAY_TIMEOUT, "Upstream timed out".to_string())
            }
            AppError::Http { status, message } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                message.clone(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            other => {
                tracing::error!("Proxy error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal proxy error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "detail": error_message,
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `std::io::Error` is not cloneable, so `Io` keeps only its kind and message.
    fn clone(&self) -> Self {
        match self {
            AppError::Validation(msg) => AppError::Validation(msg.clone()),
            AppError::Http { status, message } => AppError::Http {
                status: *status,
                message: message.clone(),
            },
            AppError::Timeout => AppError::Timeout,
            AppError::Transport(msg) => AppError::Transport(msg.clone()),
            AppError::InvalidResponse(msg) => AppError::InvalidResponse(msg.clone()),
            AppError::EmptyResult(msg) => AppError::EmptyResult(msg.clone()),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::Storage(msg) => AppError::Storage(msg.clone()),
            AppError::Io(e) => AppError::Io(std::io::Error::new(e.kind(), e.to_string())),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout
        } else if err.is_decode() {
            AppError::InvalidResponse(err.to_string())
        } else {
            AppError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidResponse(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}
