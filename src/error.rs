//! Error types for the OAuth gateway

use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::http::json_response;

/// Result type alias for the OAuth gateway
pub type Result<T> = std::result::Result<T, Error>;

/// OAuth gateway errors
///
/// The `Display` text of request-time variants doubles as the
/// `error_description` sent to the user agent.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or incomplete client request
    #[error("{0}")]
    BadRequest(String),

    /// Unknown resource
    #[error("{0}")]
    NotFound(String),

    /// Anti-CSRF token mismatch
    #[error("{0}")]
    Forbidden(String),

    /// Wrong HTTP method
    #[error("Only \"{0}\" method is allowed")]
    MethodNotAllowed(&'static str),

    /// Wrong request content type
    #[error("Content type must be \"{0}\"")]
    NotAcceptable(&'static str),

    /// Request body exceeds the configured limit
    #[error("Request body is too large, limit is {0} bytes")]
    PayloadTooLarge(usize),

    /// Non-success answer from the authorization or resource server
    #[error("{message}")]
    Upstream {
        /// Upstream HTTP status
        status: u16,
        /// `error` field of the upstream body, or the status text
        message: String,
        /// Upstream response body
        details: Option<Value>,
    },

    /// Authorization server broke RFC 6749 §5.1
    #[error("{0}")]
    InvalidAuthorization(String),

    /// Refused open redirect
    #[error("Can not redirect to location \"{0}\"")]
    Redirect(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an upstream error from a status and a response body
    ///
    /// The message is the RFC 6749 §5.2 `error` field when the body has one.
    pub fn upstream(status: StatusCode, details: Value) -> Self {
        let message = details
            .get("error")
            .and_then(Value::as_str)
            .map_or_else(
                || status.canonical_reason().unwrap_or("Unknown status").to_string(),
                String::from,
            );

        Self::Upstream {
            status: status.as_u16(),
            message,
            details: Some(details),
        }
    }

    /// HTTP status reported to the user agent
    ///
    /// Errors that carry no status of their own (transport failures,
    /// timeouts) fall back to 400.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::InvalidAuthorization(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Upstream response body, if any
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Upstream { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// RFC 6749 §5.2 error body
    ///
    /// Upstream details are forwarded verbatim when they are a JSON object.
    #[must_use]
    pub fn to_body(&self) -> Value {
        if let Some(details @ Value::Object(_)) = self.details() {
            return details.clone();
        }

        let status = self.status();
        let error = if status.is_client_error() {
            "invalid_request"
        } else {
            "invalid_client"
        };

        json!({
            "error": error,
            "error_description": self.to_string(),
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        json_response(self.status(), &self.to_body())
    }
}
