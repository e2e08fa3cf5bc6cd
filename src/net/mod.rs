//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP / unix-domain connection
//!     → socket.rs (raw accept, addresses captured)
//!     → listener.rs (admission check via admission::AdmissionController)
//!     → connection.rs (Client handle, close hooks)
//!     → Hand off to HTTP layer
//!
//! Client states:
//!     Open → Closed (close hooks run once)
//! ```
//!
//! # Design Decisions
//! - Rejected sockets are closed before the HTTP layer ever sees them
//! - Accept errors are reported, not fatal

pub mod address;
pub mod connection;
pub mod listener;
pub mod socket;

pub use address::SocketAddress;
pub use connection::{Client, ClientId, ClientInfo, CloseHook};
pub use listener::{ConnectionLimitingListener, ListenerError};
pub use socket::{Acceptor, Connection, RawConnection, TcpConnection};

#[cfg(unix)]
pub use socket::UnixConnection;
