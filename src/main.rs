//! http-gatekeeper
//!
//! An HTTP/1.1 + HTTP/2 server that guards its accept loop.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                ┌──────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ net::listener ──▶ admission ──▶ http::server│
//!                           │    (accept)       (global +      (hyper conn, │
//!                           │                    subnet limit)  idle timer) │
//!                           │                                       │       │
//!                           │                                       ▼       │
//!                           │  timeouts::scheduler ◀── register/update/     │
//!                           │   (tick, expire)         suspend/remove       │
//!                           │                                       │       │
//!                           │                                       ▼       │
//!     ◀─────────────────────┼── error_page ◀── middleware stack ◀── handler │
//!                           └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;

use http_gatekeeper::admission::{AdmissionController, AdmissionLimits, DefaultClientFactory};
use http_gatekeeper::config::{load_config, GatekeeperConfig};
use http_gatekeeper::http::{
    stack_middleware, DefaultErrorHandler, DefaultExceptionHandler, ExceptionHandlerMiddleware,
    HttpServer, Middleware, RequestHandler, RouterHandler,
};
use http_gatekeeper::lifecycle::{shutdown_on_signal, Shutdown};
use http_gatekeeper::net::ConnectionLimitingListener;
use http_gatekeeper::observability::{init_logging, init_metrics};

#[derive(Parser, Debug)]
#[command(name = "http-gatekeeper", version, about = "HTTP server with connection admission control")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatekeeperConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-gatekeeper starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        connection_limit = config.listener.connection_limit,
        per_subnet_limit = config.listener.connections_per_subnet_limit,
        idle_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let error_handler = Arc::new(DefaultErrorHandler::new());
    let exceptions: Arc<dyn Middleware> = Arc::new(ExceptionHandlerMiddleware::new(Arc::new(
        DefaultExceptionHandler::new(error_handler.clone()),
    )));
    let router: Arc<dyn RequestHandler> = Arc::new(RouterHandler::new(demo_router()));
    let handler = stack_middleware(router, [exceptions]);

    let server = Arc::new(
        HttpServer::new(config.timeouts.clone(), handler).with_error_handler(error_handler),
    );

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    // One controller for every listener: the limits are server-wide.
    let admission = Arc::new(AdmissionController::new(
        DefaultClientFactory,
        AdmissionLimits::from(&config.listener),
    ));
    let tcp = ConnectionLimitingListener::bind_with(&config.listener, admission.clone()).await?;

    let mut unix_task: Option<tokio::task::JoinHandle<()>> = None;
    #[cfg(unix)]
    if let Some(path) = &config.listener.unix_socket {
        let path = PathBuf::from(path);
        // A stale socket file from a previous run blocks the bind.
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let unix = ConnectionLimitingListener::bind_unix(&path, admission.clone())?;
        let server = server.clone();
        let shutdown = shutdown.clone();
        unix_task = Some(tokio::spawn(async move {
            if let Err(err) = server.run(unix, shutdown).await {
                tracing::error!(error = %err, "Unix socket server failed");
            }
        }));
    }

    let result = server.run(tcp, shutdown.clone()).await;
    // Stop the unix listener too if the TCP server exited on its own.
    shutdown.trigger();
    if let Some(task) = unix_task {
        let _ = task.await;
    }
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_router() -> Router {
    Router::new()
        .route("/", get(|| async { "http-gatekeeper\n" }))
        .route("/health", get(|| async { "ok\n" }))
}
