//! Errors raised while handling a request.
//!
//! A handler fails in one of two ways. [`HttpError`] is a deliberate signal
//! carrying the status the client should see; it travels up the middleware
//! stack untouched and is rendered by the server's error handler. Anything
//! else is [`HandlerError::Other`], an unexpected failure that the exception
//! middleware logs and turns into a 500 page.

use std::fmt;

use axum::http::StatusCode;

/// A deliberate error response, raised from a handler with `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    status: StatusCode,
    reason: Option<String>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
        }
    }

    /// An error with a custom reason phrase.
    pub fn with_reason(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}", self.status.as_u16())?;
        match self.reason() {
            Some(reason) if !reason.is_empty() => write!(f, ": {reason}"),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<StatusCode> for HttpError {
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

/// Boxed unexpected failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by request handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Deliberate HTTP error; never treated as unexpected.
    #[error(transparent)]
    Http(#[from] HttpError),
    /// Anything else the handler could not deal with.
    #[error(transparent)]
    Other(BoxError),
}

impl HandlerError {
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::other(err)
    }
}
