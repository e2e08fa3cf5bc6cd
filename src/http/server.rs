//! HTTP server: the protocol driver on top of admission and timeouts.
//!
//! # Responsibilities
//! - Accept admitted clients from a `ConnectionLimitingListener`
//! - Serve HTTP/1.1 and HTTP/2 on each connection (hyper auto builder)
//! - Close connections that sit idle with no request in flight
//! - Render errors escaping the handler stack
//! - Drain connections on shutdown

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use futures_util::FutureExt;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::task::JoinSet;

use crate::admission::{Accepted, ClientFactory};
use crate::config::TimeoutConfig;
use crate::http::error::HandlerError;
use crate::http::error_page::{DefaultErrorHandler, ErrorHandler};
use crate::http::handler::{Request, RequestHandler, Response};
use crate::lifecycle::Shutdown;
use crate::net::{Acceptor, Client, ConnectionLimitingListener};
use crate::timeouts::{TimeoutQueue, TimeoutScheduler, CONNECTION_STREAM};

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to read listener address: {0}")]
    LocalAddress(#[source] std::io::Error),
}

/// Backoff after a failed accept, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// HTTP server.
///
/// Every `run` of one server shares a single timeout scheduler, started by
/// the first run and stopped when the server is dropped.
pub struct HttpServer {
    handler: Arc<dyn RequestHandler>,
    error_handler: Arc<dyn ErrorHandler>,
    timeouts: TimeoutConfig,
    scheduler: OnceLock<TimeoutScheduler>,
}

impl HttpServer {
    pub fn new(timeouts: TimeoutConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            handler,
            error_handler: Arc::new(DefaultErrorHandler::new()),
            timeouts,
            scheduler: OnceLock::new(),
        }
    }

    /// Replace the handler that renders error pages.
    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Must be called within a Tokio runtime.
    fn scheduler(&self) -> &TimeoutScheduler {
        self.scheduler
            .get_or_init(|| TimeoutScheduler::start(self.timeouts.tick()))
    }

    /// Serve clients from `listener` until `shutdown` is triggered.
    ///
    /// On shutdown the listener is dropped, open connections are asked to
    /// finish, and any still open after the grace period are aborted.
    pub async fn run<A, F>(
        &self,
        listener: ConnectionLimitingListener<A, F>,
        shutdown: Shutdown,
    ) -> Result<(), ServerError>
    where
        A: Acceptor,
        F: ClientFactory<A::Connection>,
    {
        let address = listener.local_address().map_err(ServerError::LocalAddress)?;
        tracing::info!(address = %address, "HTTP server starting");

        let ctx = Arc::new(ConnectionContext {
            handler: self.handler.clone(),
            error_handler: self.error_handler.clone(),
            queue: self.scheduler().queue(),
            idle: self.timeouts.idle(),
        });

        let mut connections = JoinSet::new();
        let stop = shutdown.wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => {
                        connections.spawn(serve_connection(accepted, ctx.clone(), shutdown.clone()));
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = finished {
                        if err.is_panic() {
                            tracing::error!(error = %err, "Connection task panicked");
                        }
                    }
                }
            }
        }

        drop(listener);
        tracing::info!(
            address = %address,
            open_connections = connections.len(),
            "HTTP server stopping, draining connections"
        );

        let grace = self.timeouts.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                grace_secs = grace.as_secs(),
                "Grace period elapsed, aborting open connections"
            );
            connections.shutdown().await;
        }

        tracing::info!(address = %address, "HTTP server stopped");
        Ok(())
    }
}

/// Shared by every connection of one server run.
struct ConnectionContext {
    handler: Arc<dyn RequestHandler>,
    error_handler: Arc<dyn ErrorHandler>,
    queue: Arc<TimeoutQueue>,
    idle: Duration,
}

impl ConnectionContext {
    /// Run the handler stack, turning every failure into a response.
    async fn respond(&self, request: Request) -> Response {
        let result = AssertUnwindSafe(self.handler.handle_request(request))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(response)) => response,
            Ok(Err(HandlerError::Http(err))) => {
                tracing::debug!(status = %err.status(), "Handler returned HTTP error");
                self.error_handler.handle_error(err.status(), err.reason())
            }
            Ok(Err(HandlerError::Other(err))) => {
                tracing::error!(error = %err, "Unhandled error escaped the handler stack");
                self.error_handler
                    .handle_error(StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            Err(_) => {
                tracing::error!("Request handler panicked");
                self.error_handler
                    .handle_error(StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        }
    }
}

async fn serve_connection<S>(accepted: Accepted<S>, ctx: Arc<ConnectionContext>, shutdown: Shutdown)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let Accepted { client, socket } = accepted;

    let queue = ctx.queue.clone();
    client.on_close(move |client| queue.remove_client(client));

    ctx.queue
        .register(&client, CONNECTION_STREAM, ctx.idle, |client, _stream| async move {
            tracing::debug!(
                client_id = %client.id(),
                remote = %client.remote_address(),
                "Idle timeout, closing connection"
            );
            client.close();
        });

    let activity = Arc::new(Activity {
        in_flight: Mutex::new(0),
        client: client.clone(),
        queue: ctx.queue.clone(),
        idle: ctx.idle,
    });

    let service = {
        let ctx = ctx.clone();
        let client = client.clone();
        service_fn(move |request: hyper::Request<Incoming>| {
            let ctx = ctx.clone();
            let client = client.clone();
            let guard = activity.begin();
            async move {
                let mut request = request.map(Body::new);
                request.extensions_mut().insert(client.info());

                let response = ctx.respond(request).await;
                Ok::<_, Infallible>(response.map(|body| TrackedBody {
                    inner: body,
                    _guard: guard,
                }))
            }
        })
    };

    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(socket), service);
    tokio::pin!(conn);

    let closed = client.closed();
    tokio::pin!(closed);
    let stop = shutdown.wait();
    tokio::pin!(stop);
    let mut draining = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(client_id = %client.id(), error = %err, "Connection error");
                }
                break;
            }
            // Closed by the idle timeout or by the application: drop the socket.
            _ = &mut closed => break,
            _ = &mut stop, if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    client.close();
}

/// Tracks requests in flight on one connection.
///
/// The idle timeout is suspended while any request is in flight and re-armed
/// when the last one finishes, response body included.
struct Activity {
    in_flight: Mutex<usize>,
    client: Arc<Client>,
    queue: Arc<TimeoutQueue>,
    idle: Duration,
}

impl Activity {
    fn begin(self: &Arc<Self>) -> RequestGuard {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *in_flight += 1;
        if *in_flight == 1 {
            self.queue.suspend(&self.client, CONNECTION_STREAM);
        }
        RequestGuard {
            activity: self.clone(),
        }
    }

    fn end(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *in_flight -= 1;
        if *in_flight == 0 {
            self.queue.update(&self.client, CONNECTION_STREAM, self.idle);
        }
    }
}

struct RequestGuard {
    activity: Arc<Activity>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.activity.end();
    }
}

/// Response body that keeps its request counted until it is fully sent.
struct TrackedBody {
    inner: Body,
    _guard: RequestGuard,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
