//! Recovery from unexpected handler failures.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use axum::http::{Method, StatusCode, Uri, Version};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::error::HandlerError;
use crate::http::error_page::ErrorHandler;
use crate::http::handler::{HandlerResult, Request, Response};
use crate::http::middleware::{Middleware, Next};
use crate::net::ClientInfo;

/// What is known about a request once it has been handed off.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    /// Absent when the request did not come through the server.
    pub client: Option<ClientInfo>,
}

impl RequestContext {
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            client: request.extensions().get::<ClientInfo>().cloned(),
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.method, self.uri, self.version)?;
        if let Some(client) = &self.client {
            write!(f, " {} on {}", client.remote_address, client.local_address)?;
        }
        Ok(())
    }
}

/// Turns an unexpected failure into a response.
pub trait ExceptionHandler: Send + Sync + 'static {
    fn handle_exception(
        &self,
        context: &RequestContext,
        error: &(dyn Error + Send + Sync + 'static),
    ) -> Response;
}

/// Logs the failure with its request context and answers with a 500 page.
pub struct DefaultExceptionHandler {
    error_handler: Arc<dyn ErrorHandler>,
}

impl DefaultExceptionHandler {
    pub fn new(error_handler: Arc<dyn ErrorHandler>) -> Self {
        Self { error_handler }
    }
}

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle_exception(
        &self,
        context: &RequestContext,
        error: &(dyn Error + Send + Sync + 'static),
    ) -> Response {
        let (remote, local) = match &context.client {
            Some(client) => (
                client.remote_address.to_string(),
                client.local_address.to_string(),
            ),
            None => ("-".to_string(), "-".to_string()),
        };

        tracing::error!(
            error = %error,
            error_debug = ?error,
            method = %context.method,
            uri = %context.uri,
            version = ?context.version,
            remote = %remote,
            local = %local,
            "Unexpected error when handling request: {}",
            context
        );

        self.error_handler
            .handle_error(StatusCode::INTERNAL_SERVER_ERROR, None)
    }
}

/// Hands unexpected errors to an [`ExceptionHandler`].
///
/// [`HandlerError::Http`] passes through untouched; it is a response the
/// handler asked for, not a failure.
pub struct ExceptionHandlerMiddleware {
    handler: Arc<dyn ExceptionHandler>,
}

impl ExceptionHandlerMiddleware {
    pub fn new(handler: Arc<dyn ExceptionHandler>) -> Self {
        Self { handler }
    }
}

impl Middleware for ExceptionHandlerMiddleware {
    fn handle_request(&self, request: Request, next: Next) -> BoxFuture<'_, HandlerResult> {
        let context = RequestContext::from_request(&request);
        async move {
            match next.run(request).await {
                Err(HandlerError::Other(err)) => {
                    Ok(self.handler.handle_exception(&context, err.as_ref()))
                }
                result => result,
            }
        }
        .boxed()
    }
}
