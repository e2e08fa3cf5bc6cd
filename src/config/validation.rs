//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits and timeouts > 0)
//! - Validate addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatekeeperConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GatekeeperConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} is not a valid socket address: '{value}'")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} must not exceed {limit_field}")]
    Exceeds {
        field: &'static str,
        limit_field: &'static str,
    },
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &GatekeeperConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: listener.bind_address.clone(),
        });
    }
    if listener.connection_limit == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.connection_limit",
        });
    }
    if listener.connections_per_subnet_limit == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.connections_per_subnet_limit",
        });
    }
    if listener.connections_per_subnet_limit > listener.connection_limit {
        errors.push(ValidationError::Exceeds {
            field: "listener.connections_per_subnet_limit",
            limit_field: "listener.connection_limit",
        });
    }

    let timeouts = &config.timeouts;
    if timeouts.tick_millis == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.tick_millis",
        });
    }
    if timeouts.idle_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.idle_secs",
        });
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
