//! Error types and error codes for the relay service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Error codes returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Backend base URL missing or not absolute
    Misconfigured,
    /// Backend could not be reached at all
    UpstreamUnreachable,
    /// Invalid request parameters
    InvalidRequest,
    /// No such route
    NotFound,
    /// Unknown/internal error
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Misconfigured => write!(f, "MISCONFIGURED"),
            ErrorCode::UpstreamUnreachable => write!(f, "UPSTREAM_UNREACHABLE"),
            ErrorCode::InvalidRequest => write!(f, "INVALID_REQUEST"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Standard error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub code: ErrorCode,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

/// Relay error with HTTP status code
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ProxyError {
    pub fn new(status: StatusCode, message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            status,
            response: ErrorResponse::new(message, code),
        }
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            ErrorCode::Misconfigured,
        )
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            message,
            ErrorCode::UpstreamUnreachable,
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, ErrorCode::InvalidRequest)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, ErrorCode::NotFound)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            ErrorCode::Unknown,
        )
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.response.code, self.response.message)
    }
}

impl std::error::Error for ProxyError {}

/// Describe a reqwest failure in operator-readable terms
pub fn classify_reqwest_error(err: &reqwest::Error) -> String {
    let message = err.to_string();

    if err.is_timeout() {
        format!("Connection timeout: {}", message)
    } else if err.is_connect() {
        // The connect error chain carries the DNS/TLS detail only as text
        let detail = source_chain(err);
        let lower = detail.to_lowercase();
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("getaddrinfo") {
            format!("DNS resolution failed: {}", detail)
        } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
            format!("TLS error: {}", detail)
        } else {
            format!("Connection error: {}", detail)
        }
    } else if err.is_request() {
        format!("Invalid request: {}", message)
    } else if err.is_body() {
        format!("Body error: {}", message)
    } else {
        message
    }
}

fn source_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
