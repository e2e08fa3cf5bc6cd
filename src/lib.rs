//! HTTP server core with connection admission control and timeout scheduling.

pub mod admission;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod timeouts;

pub use admission::{AdmissionController, AdmissionLimits};
pub use config::schema::GatekeeperConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use net::ConnectionLimitingListener;
pub use timeouts::TimeoutScheduler;
