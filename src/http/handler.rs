//! Request handlers.
//!
//! A [`RequestHandler`] turns a request into a response or a
//! [`HandlerError`]. Handlers are shared behind `Arc` and called concurrently
//! from every connection.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::ServiceExt;

use crate::http::error::HandlerError;

pub type Request = axum::http::Request<Body>;
pub type Response = axum::http::Response<Body>;
pub type HandlerResult = Result<Response, HandlerError>;

/// Terminal request handler.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle_request(&self, request: Request) -> BoxFuture<'_, HandlerResult>;
}

impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    fn handle_request(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        (**self).handle_request(request)
    }
}

/// Handler backed by an async closure.
pub struct ClosureRequestHandler<F> {
    f: F,
}

impl<F, Fut> RequestHandler for ClosureRequestHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle_request(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        (self.f)(request).boxed()
    }
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> ClosureRequestHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    ClosureRequestHandler { f }
}

/// Serves requests with an axum [`Router`].
///
/// The router never fails; its own rejections are already responses.
#[derive(Clone)]
pub struct RouterHandler {
    router: Router,
}

impl RouterHandler {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl RequestHandler for RouterHandler {
    fn handle_request(&self, request: Request) -> BoxFuture<'_, HandlerResult> {
        let router = self.router.clone();
        async move {
            let response: Result<Response, Infallible> = router.oneshot(request).await;
            match response {
                Ok(response) => Ok(response),
                Err(never) => match never {},
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;

    use crate::http::error::HttpError;

    #[tokio::test]
    async fn closure_handler_returns_response() {
        let handler = handler_fn(|request: Request| async move {
            let path = request.uri().path().to_string();
            Ok::<_, HandlerError>(Response::new(Body::from(path)))
        });

        let request = axum::http::Request::builder().uri("/hello").body(Body::empty()).unwrap();
        let response = handler.handle_request(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"/hello");
    }

    #[tokio::test]
    async fn closure_handler_propagates_errors() {
        let handler = handler_fn(|_request: Request| async move {
            Err::<Response, _>(HandlerError::from(HttpError::new(StatusCode::NOT_FOUND)))
        });

        let err = handler
            .handle_request(Request::new(Body::empty()))
            .await
            .unwrap_err();
        assert!(err.is_http());
    }

    #[tokio::test]
    async fn router_handler_routes() {
        let handler = RouterHandler::new(Router::new().route("/ping", get(|| async { "pong" })));

        let ok = handler
            .handle_request(axum::http::Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let missing = handler
            .handle_request(axum::http::Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
