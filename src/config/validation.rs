//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (buffer sizes, timeouts)
//! - Reject route patterns the wildcard index would refuse, and duplicates
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: StackConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::StackConfig;
use crate::index::{MAX_DOMAIN_LEN, MAX_KEY_LEN};

/// One semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g., "routes[2].upstream").
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not an ip:port address", value)));
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &StackConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    let buffers = &config.buffers;
    if buffers.size < 64 {
        errors.push(ValidationError::new("buffers.size", "must be at least 64 bytes"));
    }
    if buffers.max_total == 0 {
        errors.push(ValidationError::new("buffers.max_total", "must be greater than 0"));
    }
    if buffers.max_pooled > buffers.max_total {
        errors.push(ValidationError::new("buffers.max_pooled", "cannot exceed buffers.max_total"));
    }

    // a start line or header must fit in one receive buffer
    if config.parser.max_field_size == 0 || config.parser.max_field_size > buffers.size {
        errors.push(ValidationError::new(
            "parser.max_field_size",
            format!("must be between 1 and buffers.size ({})", buffers.size),
        ));
    }

    if config.client.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("client.connect_timeout_ms", "must be greater than 0"));
    }
    if config.reactor.idle_timeout_ms == 0 {
        errors.push(ValidationError::new("reactor.idle_timeout_ms", "must be greater than 0"));
    }
    if config.origin.max_chunk == 0 {
        errors.push(ValidationError::new("origin.max_chunk", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let prefix = format!("routes[{}]", i);
        if route.domain.is_empty() || route.domain.len() > MAX_DOMAIN_LEN {
            errors.push(ValidationError::new(
                format!("{}.domain", prefix),
                format!("must be 1 to {} bytes", MAX_DOMAIN_LEN),
            ));
        }
        if route.pattern.is_empty() || route.pattern.len() > MAX_KEY_LEN {
            errors.push(ValidationError::new(
                format!("{}.pattern", prefix),
                format!("must be 1 to {} bytes", MAX_KEY_LEN),
            ));
        }
        if route.pattern.matches('*').count() > 1 {
            errors.push(ValidationError::new(format!("{}.pattern", prefix), "at most one '*' is allowed"));
        }
        match (&route.upstream, route.deny) {
            (Some(upstream), false) => check_address(&mut errors, &format!("{}.upstream", prefix), upstream),
            (None, false) => errors.push(ValidationError::new(
                format!("{}.upstream", prefix),
                "required unless the route denies",
            )),
            (_, true) => {}
        }
        if !seen.insert((route.domain.to_ascii_lowercase(), route.pattern.clone())) {
            errors.push(ValidationError::new(
                prefix,
                format!("duplicate route {}{}", route.domain, route.pattern),
            ));
        }
    }

    if let Some(upstream) = &config.default_upstream {
        check_address(&mut errors, "default_upstream", upstream);
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
