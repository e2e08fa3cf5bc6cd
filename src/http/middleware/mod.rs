//! Request middleware.
//!
//! # Data Flow
//! ```text
//! request
//!     → middleware[0] → middleware[1] → ... → terminal handler
//! response / HandlerError
//!     ← middleware[0] ← middleware[1] ← ... ←
//! ```
//!
//! A middleware receives the request together with [`Next`], the rest of the
//! chain. It may rewrite the request, short-circuit with its own response, or
//! inspect what comes back.

pub mod exception;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::handler::{HandlerResult, Request, RequestHandler};

pub use exception::{
    DefaultExceptionHandler, ExceptionHandler, ExceptionHandlerMiddleware, RequestContext,
};

pub trait Middleware: Send + Sync + 'static {
    fn handle_request(&self, request: Request, next: Next) -> BoxFuture<'_, HandlerResult>;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn handle_request(&self, request: Request, next: Next) -> BoxFuture<'_, HandlerResult> {
        (**self).handle_request(request, next)
    }
}

/// The remainder of a middleware chain.
#[derive(Clone)]
pub struct Next {
    inner: Arc<dyn RequestHandler>,
}

impl Next {
    pub fn new(inner: Arc<dyn RequestHandler>) -> Self {
        Self { inner }
    }

    /// Pass the request on to the rest of the chain.
    pub fn run(self, request: Request) -> BoxFuture<'static, HandlerResult> {
        async move { self.inner.handle_request(request).await }.boxed()
    }
}

/// Middleware backed by an async closure.
pub struct ClosureMiddleware<F> {
    f: F,
}

impl<F, Fut> Middleware for ClosureMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle_request(&self, request: Request, next: Next) -> BoxFuture<'_, HandlerResult> {
        (self.f)(request, next).boxed()
    }
}

/// Build a middleware from an async closure.
pub fn middleware_fn<F, Fut>(f: F) -> ClosureMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    ClosureMiddleware { f }
}

/// A middleware bound to the handler it wraps.
struct Stacked {
    middleware: Arc<dyn Middleware>,
    next: Arc<dyn RequestHandler>,
}

impl RequestHandler for Stacked {
    fn handle_request(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        self.middleware
            .handle_request(request, Next::new(self.next.clone()))
    }
}

/// Wrap `handler` in `middlewares`.
///
/// The first middleware is the outermost: it sees the request first and the
/// response last. With no middlewares the handler is returned as is.
pub fn stack_middleware<I>(handler: Arc<dyn RequestHandler>, middlewares: I) -> Arc<dyn RequestHandler>
where
    I: IntoIterator<Item = Arc<dyn Middleware>>,
    I::IntoIter: DoubleEndedIterator,
{
    middlewares
        .into_iter()
        .rev()
        .fold(handler, |next, middleware| {
            Arc::new(Stacked { middleware, next }) as Arc<dyn RequestHandler>
        })
}
