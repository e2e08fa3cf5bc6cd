//! Error page rendering.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use dashmap::DashMap;
use hyper::ext::ReasonPhrase;

use crate::http::handler::Response;

const ERROR_TEMPLATE: &str = include_str!("../../resources/error.html");

/// Renders the response sent for an error status.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle_error(&self, status: StatusCode, reason: Option<&str>) -> Response;
}

/// Fills `resources/error.html` with the status code and its standard reason.
///
/// The page always shows the standard reason so it can be cached per status;
/// a custom reason only changes the status line.
#[derive(Debug, Default)]
pub struct DefaultErrorHandler {
    cache: DashMap<StatusCode, Bytes>,
}

impl DefaultErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn page(&self, status: StatusCode) -> Bytes {
        self.cache
            .entry(status)
            .or_insert_with(|| render(status))
            .value()
            .clone()
    }
}

fn render(status: StatusCode) -> Bytes {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    ERROR_TEMPLATE
        .replace("{code}", status.as_str())
        .replace("{reason}", reason)
        .into()
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle_error(&self, status: StatusCode, reason: Option<&str>) -> Response {
        let mut response = Response::new(Body::from(self.page(status)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );

        if let Some(reason) = reason.filter(|r| !r.is_empty()) {
            match ReasonPhrase::try_from(reason.as_bytes()) {
                Ok(phrase) => {
                    response.extensions_mut().insert(phrase);
                }
                Err(_) => tracing::debug!(status = %status, reason, "Ignoring invalid reason phrase"),
            }
        }

        response
    }
}
