//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Raw socket from the listener
//!     → controller.rs (global limit, before a client exists)
//!     → factory.rs (build the Client)
//!     → subnet.rs (derive the subnet key from the remote address)
//!     → controller.rs (per-subnet limit)
//!     → Accepted client handed to the protocol driver
//!
//! Client close:
//!     close hook → release global and subnet counts
//! ```
//!
//! # Design Decisions
//! - Rejection is a normal outcome under load: `None` plus a warning, never an error
//! - Loopback and unix-domain clients are exempt from the subnet limit
//! - Independent of the timeout scheduler

pub mod controller;
pub mod factory;
pub mod subnet;

pub use controller::{AdmissionController, AdmissionLimits};
pub use factory::{Accepted, ClientFactory, DefaultClientFactory};
pub use subnet::SubnetKey;
