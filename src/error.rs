//! Error types for envoy-exporter

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors from the Enlighten/Entrez token lifecycle
#[derive(Error, Debug)]
pub enum AuthError {
    /// Login or token request failed at the transport level
    #[error("Authentication request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The cloud login was rejected
    #[error("Login failed: {0}")]
    LoginRejected(String),

    /// The login or token response could not be decoded
    #[error("Failed to decode authentication response: {0}")]
    Decode(String),

    /// The token endpoint returned an empty token
    #[error("Token endpoint returned an empty token")]
    EmptyToken,
}

/// Errors from the local device HTTP client
#[derive(Error, Debug)]
pub enum CollectorError {
    /// HTTP client initialization failed
    #[error("Failed to initialize HTTP client: {0}")]
    HttpClientInit(#[source] reqwest::Error),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[source] reqwest::Error),

    /// Failed to read the HTTP response body
    #[error("Failed to read HTTP response: {0}")]
    HttpResponse(#[source] reqwest::Error),

    /// The configured endpoint URL is invalid after substitution
    #[error("Invalid endpoint URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The device answered with an HTML login page
    #[error("Authentication failed (401), token may be expired or invalid")]
    AuthenticationFailed,

    /// The endpoint does not exist on this Envoy model
    #[error("Endpoint not found (404), feature may not be available on this Envoy model")]
    EndpointNotFound,

    /// The endpoint requires installer or owner privileges
    #[error("Access forbidden (403), endpoint may require installer/owner privileges")]
    AccessForbidden,

    /// HTML where JSON was expected, reason unknown
    #[error("Received HTML response instead of JSON (status {status})")]
    HtmlResponse { status: u16 },

    /// The device returned an empty body
    #[error("Received empty response")]
    EmptyResponse,
}

/// Result type for collector operations
pub type CollectResult<T> = Result<T, CollectorError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Device collection error
    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, public_message, log_message) = match self {
            AppError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error",
                e.to_string(),
            ),
            AppError::Auth(e) => (StatusCode::BAD_GATEWAY, "Upstream error", e.to_string()),
            AppError::Collector(e) => (StatusCode::BAD_GATEWAY, "Upstream error", e.to_string()),
            AppError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error", e),
        };

        tracing::error!(status = %status, error = %log_message, "Request failed");

        (status, public_message).into_response()
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;
