//! Global and per-subnet connection limits.
//!
//! # Responsibilities
//! - Count open clients against the global connection limit
//! - Count open clients per subnet against the per-subnet limit
//! - Release both counts exactly once, from the client's close hook
//!
//! # Design Decisions
//! - The global limit is checked before a client exists, the subnet limit
//!   after (it needs the client's address)
//! - Every rejection after construction goes through `Client::close`, so
//!   there is a single decrement path
//! - Subnet entries are removed at zero; the map only holds live subnets

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::admission::factory::{Accepted, ClientFactory};
use crate::admission::subnet::SubnetKey;
use crate::config::ListenerConfig;
use crate::net::RawConnection;
use crate::observability::metrics;

/// Limits enforced by the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    /// Maximum number of concurrently open clients.
    pub connection_limit: usize,
    /// Maximum number of concurrently open clients per subnet.
    pub per_subnet_limit: usize,
}

impl From<&ListenerConfig> for AdmissionLimits {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            connection_limit: config.connection_limit,
            per_subnet_limit: config.connections_per_subnet_limit,
        }
    }
}

/// Counters shared with the close hooks of admitted clients.
#[derive(Debug, Default)]
struct Counters {
    clients: AtomicUsize,
    per_subnet: DashMap<SubnetKey, usize>,
}

impl Counters {
    /// Count one more client in `key`, returning the new count.
    fn enter_subnet(&self, key: SubnetKey) -> usize {
        let mut count = self.per_subnet.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    fn leave_subnet(&self, key: SubnetKey) {
        if let Entry::Occupied(mut entry) = self.per_subnet.entry(key) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }

    fn release(&self, subnet: Option<SubnetKey>) {
        if let Some(key) = subnet {
            self.leave_subnet(key);
        }
        self.clients.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed();
    }
}

/// Decides whether an incoming socket becomes a client.
pub struct AdmissionController<F> {
    delegate: F,
    limits: AdmissionLimits,
    counters: Arc<Counters>,
}

impl<F> AdmissionController<F> {
    pub fn new(delegate: F, limits: AdmissionLimits) -> Self {
        tracing::info!(
            connection_limit = limits.connection_limit,
            per_subnet_limit = limits.per_subnet_limit,
            "Total client connections are limited to {}",
            limits.connection_limit
        );

        Self {
            delegate,
            limits,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Admit or reject a raw connection.
    ///
    /// Rejected sockets are closed; the caller only sees `None`.
    pub fn try_accept<S>(&self, socket: S) -> Option<Accepted<S>>
    where
        S: RawConnection,
        F: ClientFactory<S>,
    {
        let count = self.counters.clients.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.limits.connection_limit {
            self.counters.clients.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(
                remote = %socket.remote_address(),
                connection_limit = self.limits.connection_limit,
                "Client denied: too many existing connections"
            );
            metrics::connection_rejected("global");
            socket.close();
            return None;
        }

        let Some(accepted) = self.delegate.create_client(socket) else {
            self.counters.clients.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("Client factory declined connection");
            metrics::connection_rejected("factory");
            return None;
        };

        let client = &accepted.client;
        let subnet = SubnetKey::for_client(client.remote_address(), client.local_address());
        let subnet_count = subnet.map(|key| self.counters.enter_subnet(key));

        metrics::connection_opened();
        let counters = Arc::clone(&self.counters);
        client.on_close(move |_| counters.release(subnet));

        if let (Some(key), Some(count)) = (subnet, subnet_count) {
            if count > self.limits.per_subnet_limit {
                let offending = match (key.is_ipv6_prefix(), client.remote_address().ip()) {
                    (true, Some(ip)) => format!("{}/56", ip),
                    (_, Some(ip)) => ip.to_string(),
                    (_, None) => key.to_string(),
                };
                tracing::warn!(
                    client_id = %client.id(),
                    subnet = %key,
                    per_subnet_limit = self.limits.per_subnet_limit,
                    "Client denied: too many existing connections from {}",
                    offending
                );
                metrics::connection_rejected("subnet");
                client.close();
                accepted.socket.close();
                return None;
            }
        }

        Some(accepted)
    }

    /// Number of currently open clients.
    pub fn connection_count(&self) -> usize {
        self.counters.clients.load(Ordering::SeqCst)
    }

    /// Number of currently open clients in `key`.
    pub fn subnet_count(&self, key: &SubnetKey) -> usize {
        self.counters.per_subnet.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Number of subnets with at least one open client.
    pub fn tracked_subnets(&self) -> usize {
        self.counters.per_subnet.len()
    }

    pub fn limits(&self) -> AdmissionLimits {
        self.limits
    }
}
