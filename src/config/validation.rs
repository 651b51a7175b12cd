//! Configuration validation.
//!
//! Serde handles the syntax; this module checks the values. Every problem is
//! collected so a bad config file is reported in one pass.

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("auth.token must not be empty")]
    EmptyToken,
    #[error("auth.{0} must not be empty")]
    EmptyHeaderName(&'static str),
    #[error("listener.bind_address {0:?} is not a socket address")]
    InvalidBindAddress(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("tunnel.allowed_ports must not contain port 0")]
    ZeroPort,
    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a configuration, returning every violation found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.auth.token.is_empty() {
        errors.push(ValidationError::EmptyToken);
    }
    if config.auth.token_header.trim().is_empty() {
        errors.push(ValidationError::EmptyHeaderName("token_header"));
    }
    if config.auth.uid_header.trim().is_empty() {
        errors.push(ValidationError::EmptyHeaderName("uid_header"));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.listener.handshake_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("listener.handshake_timeout_secs"));
    }
    if config.tunnel.idle_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("tunnel.idle_timeout_secs"));
    }
    if config.tunnel.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("tunnel.connect_timeout_secs"));
    }
    if config.forward.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("forward.request_timeout_secs"));
    }
    if config.tunnel.allowed_ports.contains(&0) {
        errors.push(ValidationError::ZeroPort);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
