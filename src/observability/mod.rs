//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! admission, timeouts, http produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (connection gauge, rejection and timeout counters)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
