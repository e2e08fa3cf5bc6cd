//! Client handles and their close lifecycle.
//!
//! # Responsibilities
//! - Generate unique client IDs for tracing and timeout keys
//! - Track the open/closed state of an accepted connection
//! - Run close hooks exactly once when the client closes
//!
//! # Design Decisions
//! - The protocol driver owns the `Arc<Client>`; admission and timeouts only
//!   key on `ClientId` or hold a `Weak<Client>`
//! - Close is signalled through a watch channel so the connection task can
//!   select on it
//! - Dropping an open client closes it, so counters never leak

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

use crate::net::address::SocketAddress;

/// Global atomic counter for client IDs.
/// Relaxed ordering is enough since we only need uniqueness.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocate the next client ID.
    pub fn next() -> Self {
        Self(CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Callback run once when a client closes.
pub type CloseHook = Box<dyn FnOnce(&Client) + Send>;

/// One accepted connection.
pub struct Client {
    id: ClientId,
    remote_address: SocketAddress,
    local_address: SocketAddress,
    /// Pending close hooks; `None` once the client has closed.
    hooks: Mutex<Option<Vec<CloseHook>>>,
    closed_tx: watch::Sender<bool>,
}

impl Client {
    pub fn new(remote_address: SocketAddress, local_address: SocketAddress) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id: ClientId::next(),
            remote_address,
            local_address,
            hooks: Mutex::new(Some(Vec::new())),
            closed_tx,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn remote_address(&self) -> &SocketAddress {
        &self.remote_address
    }

    pub fn local_address(&self) -> &SocketAddress {
        &self.local_address
    }

    /// Snapshot of the identifying fields, for request extensions and logs.
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            remote_address: self.remote_address.clone(),
            local_address: self.local_address.clone(),
        }
    }

    /// Register a hook to run when the client closes.
    ///
    /// Hooks run in registration order. Registering on an already closed
    /// client runs the hook immediately.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce(&Client) + Send + 'static,
    {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        match hooks.as_mut() {
            Some(pending) => pending.push(Box::new(hook)),
            None => {
                drop(hooks);
                hook(self);
            }
        }
    }

    /// Close the client. Only the first call runs the close hooks.
    pub fn close(&self) {
        let hooks = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(hooks) = hooks else {
            return;
        };

        // Flag first: anything that observes the hooks running sees a closed client.
        self.closed_tx.send_replace(true);
        tracing::trace!(client_id = %self.id, remote = %self.remote_address, "Client closed");

        for hook in hooks {
            hook(self);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Resolves once the client has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("local_address", &self.local_address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Identifying fields of a client, attached to every request it sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub remote_address: SocketAddress,
    pub local_address: SocketAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn client() -> Client {
        Client::new(
            SocketAddress::Inet("203.0.113.7:50000".parse().unwrap()),
            SocketAddress::Inet("192.0.2.1:8080".parse().unwrap()),
        )
    }

    #[test]
    fn client_id_unique() {
        let id1 = ClientId::next();
        let id2 = ClientId::next();
        assert_ne!(id1, id2);
        assert_ne!(client().id(), client().id());
    }

    #[test]
    fn close_runs_every_hook_once() {
        let client = client();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            client.on_close(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(!client.is_closed());
        client.close();
        client.close();
        assert!(client.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let client = client();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            client.on_close(move |_| order.lock().unwrap().push(i));
        }
        client.close();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn hook_registered_after_close_runs_immediately() {
        let client = client();
        client.close();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        client.on_close(move |closed| {
            assert!(closed.is_closed());
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_open_client() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let client = client();
            let c = calls.clone();
            client.on_close(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let client = Arc::new(client());
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.closed().await })
        };

        client.close();
        waiter.await.unwrap();

        // Already closed: resolves straight away.
        client.closed().await;
    }
}
