//! Timeout scheduling subsystem.
//!
//! # Data Flow
//! ```text
//! Protocol driver:
//!     register / update / suspend / remove (client, stream)
//!     → queue.rs (entry table + keyed heap, one mutex)
//!
//! Every tick (scheduler.rs):
//!     snapshot now
//!     → queue.rs extracts every entry with expiry <= now, earliest first
//!     → each callback spawned as its own task
//!
//! Client close hook:
//!     → queue.rs remove_client (drops every stream of that client)
//! ```
//!
//! # Design Decisions
//! - Coarse ticks (one second by default): idle and slow-client timeouts do
//!   not need sub-second precision, and one sweep amortizes many expiries
//! - The tick loop never waits on a callback
//! - Independent of the admission controller

pub mod heap;
pub mod queue;
pub mod scheduler;

pub use queue::{ExpiredTimeout, StreamId, TimeoutKey, TimeoutQueue, CONNECTION_STREAM};
pub use scheduler::TimeoutScheduler;
