//! Centralized error types for the relay core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the relay server.
///
/// Variants correspond to the error kinds and dispositions of the relay design:
/// transient would-block conditions are not represented here (they never escape
/// the I/O layer), everything else that can terminate a relay, a client
/// connection, or a reconfiguration attempt has a variant.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum RelayError {
    /// Requested mount does not exist or has no active publisher.
    #[error("mount not found: {0}")]
    MountNotFound(String),

    /// Client sent a malformed HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A subscriber's output sink exceeded its queue cap.
    #[error("client overflow on mount {mount}: {detail}")]
    ClientOverflow { mount: String, detail: String },

    /// An auth handler rejected the request.
    #[error("auth denied: {0}")]
    AuthDenied(String),

    /// Global `clients_limit` was reached.
    #[error("client limit reached ({0})")]
    ClientLimitReached(usize),

    /// Relay connect failed (refused, timed out, or errored during `connect`).
    #[error("relay connect failed for {url}: {detail}")]
    RelayConnect { url: String, detail: String },

    /// Upstream origin responded with a non-200 status, bad headers, or an
    /// oversized/unparseable response.
    #[error("upstream protocol error for {url}: {detail}")]
    UpstreamProtocol { url: String, detail: String },

    /// Configuration value failed validation (e.g. malformed burst size).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A resource required at startup could not be obtained.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MountNotFound(_) => "mount_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ClientOverflow { .. } => "client_overflow",
            Self::AuthDenied(_) => "auth_denied",
            Self::ClientLimitReached(_) => "client_limit_reached",
            Self::RelayConnect { .. } => "relay_connect_failed",
            Self::UpstreamProtocol { .. } => "upstream_protocol_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    ///
    /// Only the client-facing variants (those that can surface on the mount-GET
    /// path) have a meaningful HTTP disposition; relay-internal variants use
    /// this only for logging symmetry and are never actually returned to a
    /// client by `IntoResponse`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MountNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthDenied(_) => StatusCode::FORBIDDEN,
            Self::ClientLimitReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_not_found_returns_correct_code() {
        let err = RelayError::MountNotFound("/radio.mp3".into());
        assert_eq!(err.code(), "mount_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn client_limit_reached_maps_to_503() {
        let err = RelayError::ClientLimitReached(100);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn auth_denied_maps_to_403() {
        let err = RelayError::AuthDenied("no token".into());
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }
}
