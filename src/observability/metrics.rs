//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatekeeper_connections_active` (gauge): currently admitted clients
//! - `gatekeeper_connections_rejected_total` (counter): rejections by `reason`
//!   (`global`, `subnet`, `factory`)
//! - `gatekeeper_timeouts_fired_total` (counter): expired timeouts dispatched
//!
//! Recording goes through the `metrics` facade, so these are no-ops until
//! [`init_metrics`] installs the Prometheus recorder.

use std::net::SocketAddr;

use ::metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

const CONNECTIONS_ACTIVE: &str = "gatekeeper_connections_active";
const CONNECTIONS_REJECTED: &str = "gatekeeper_connections_rejected_total";
const TIMEOUTS_FIRED: &str = "gatekeeper_timeouts_fired_total";

/// Install the Prometheus recorder and serve it over HTTP on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(err) => tracing::error!(error = %err, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn connection_opened() {
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn connection_rejected(reason: &'static str) {
    counter!(CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

pub fn timeout_fired() {
    counter!(TIMEOUTS_FIRED).increment(1);
}
