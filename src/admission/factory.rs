//! Client construction behind the admission check.

use std::sync::Arc;

use crate::net::{Client, RawConnection};

/// An admitted connection: the client handle plus the socket it owns.
#[derive(Debug)]
pub struct Accepted<S> {
    pub client: Arc<Client>,
    pub socket: S,
}

/// Builds a `Client` for a raw connection that passed the global limit.
///
/// Returning `None` rejects the connection; the factory is then responsible
/// for the socket it was handed.
pub trait ClientFactory<S: RawConnection>: Send + Sync + 'static {
    fn create_client(&self, socket: S) -> Option<Accepted<S>>;
}

/// Creates a client straight from the socket's addresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClientFactory;

impl<S: RawConnection> ClientFactory<S> for DefaultClientFactory {
    fn create_client(&self, socket: S) -> Option<Accepted<S>> {
        let client = Arc::new(Client::new(
            socket.remote_address().clone(),
            socket.local_address().clone(),
        ));
        tracing::trace!(
            client_id = %client.id(),
            remote = %client.remote_address(),
            local = %client.local_address(),
            "Client created"
        );
        Some(Accepted { client, socket })
    }
}
