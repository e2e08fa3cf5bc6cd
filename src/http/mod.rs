//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! admitted client (net::ConnectionLimitingListener)
//!     → server.rs (hyper auto connection, idle timeout, ClientInfo extension)
//!     → middleware/ (stacked around the terminal handler)
//!     → handler.rs (RequestHandler, axum Router adapter)
//!     → error_page.rs (HttpError and failures rendered as HTML)
//!     → Send to client
//! ```

pub mod error;
pub mod error_page;
pub mod handler;
pub mod middleware;
pub mod server;
pub mod trailers;

pub use error::{BoxError, HandlerError, HttpError};
pub use error_page::{DefaultErrorHandler, ErrorHandler};
pub use handler::{handler_fn, HandlerResult, Request, RequestHandler, Response, RouterHandler};
pub use middleware::{
    middleware_fn, stack_middleware, DefaultExceptionHandler, ExceptionHandler,
    ExceptionHandlerMiddleware, Middleware, Next, RequestContext,
};
pub use server::{HttpServer, ServerError};
pub use trailers::{TrailerError, Trailers, DISALLOWED_TRAILERS};
