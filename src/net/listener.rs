//! Listener with admission control on the accept path.
//!
//! # Responsibilities
//! - Bind to the configured address (TCP or unix-domain)
//! - Accept incoming connections
//! - Run every connection through the admission controller
//! - Keep accepting past rejected connections
//!
//! # Design Decisions
//! - Listeners of one server share a single `AdmissionController`, so the
//!   global limit covers TCP and unix-domain clients together

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::admission::{Accepted, AdmissionController, AdmissionLimits, ClientFactory, DefaultClientFactory};
use crate::config::ListenerConfig;
use crate::net::address::SocketAddress;
use crate::net::socket::Acceptor;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid bind address '{address}': {source}")]
    InvalidAddress {
        address: String,
        source: std::net::AddrParseError,
    },
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// A listener that only yields admitted clients.
pub struct ConnectionLimitingListener<A, F = DefaultClientFactory> {
    inner: A,
    admission: Arc<AdmissionController<F>>,
}

impl ConnectionLimitingListener<TcpListener> {
    /// Bind to the configured TCP address with its own admission controller.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let admission = AdmissionController::new(DefaultClientFactory, AdmissionLimits::from(config));
        Self::bind_with(config, Arc::new(admission)).await
    }
}

impl<F> ConnectionLimitingListener<TcpListener, F> {
    /// Bind to the configured TCP address, admitting through `admission`.
    pub async fn bind_with(
        config: &ListenerConfig,
        admission: Arc<AdmissionController<F>>,
    ) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|source| ListenerError::InvalidAddress {
                address: config.bind_address.clone(),
                source,
            })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            connection_limit = admission.limits().connection_limit,
            per_subnet_limit = admission.limits().per_subnet_limit,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            admission,
        })
    }
}

#[cfg(unix)]
impl<F> ConnectionLimitingListener<tokio::net::UnixListener, F> {
    /// Bind a unix-domain socket. Its clients are exempt from the subnet limit
    /// but count against the global limit of `admission`.
    pub fn bind_unix(
        path: &std::path::Path,
        admission: Arc<AdmissionController<F>>,
    ) -> Result<Self, ListenerError> {
        let listener = tokio::net::UnixListener::bind(path).map_err(ListenerError::Bind)?;

        tracing::info!(
            path = %path.display(),
            connection_limit = admission.limits().connection_limit,
            "Unix listener bound"
        );

        Ok(Self {
            inner: listener,
            admission,
        })
    }
}

impl<A, F> ConnectionLimitingListener<A, F>
where
    A: Acceptor,
    F: ClientFactory<A::Connection>,
{
    pub fn new(inner: A, admission: impl Into<Arc<AdmissionController<F>>>) -> Self {
        Self {
            inner,
            admission: admission.into(),
        }
    }

    /// Accept the next admitted client.
    ///
    /// Rejected connections are closed and skipped; this only returns on an
    /// admitted client or an accept error.
    pub async fn accept(&self) -> Result<Accepted<A::Connection>, ListenerError> {
        loop {
            let socket = self.inner.accept_raw().await.map_err(ListenerError::Accept)?;

            if let Some(accepted) = self.admission.try_accept(socket) {
                tracing::debug!(
                    client_id = %accepted.client.id(),
                    remote = %accepted.client.remote_address(),
                    open_connections = self.admission.connection_count(),
                    "Connection accepted"
                );
                return Ok(accepted);
            }
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_address(&self) -> Result<SocketAddress, std::io::Error> {
        self.inner.local_address()
    }

    pub fn admission(&self) -> &AdmissionController<F> {
        &self.admission
    }
}
