//! Errors raised while serving a request.
//!
//! [`ProtocolError`] is the one error type the request path turns into an
//! HTTP response: it carries the status to answer with. OS-level failures
//! travel as `std::io::Error` inside `anyhow::Error` and become a 500.

use thiserror::Error;

use crate::http::response::StatusCode;

/// Malformed or unacceptable client input.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct ProtocolError {
    pub status: StatusCode,
    pub message: String,
}

impl ProtocolError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::MethodNotAllowed, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotImplemented, message)
    }
}

/// Finds the status to answer with for an error raised by a handler.
pub fn status_of(err: &anyhow::Error) -> StatusCode {
    err.downcast_ref::<ProtocolError>()
        .map(|e| e.status)
        .unwrap_or(StatusCode::InternalServerError)
}
