//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. All errors are collected so one reload reports everything.

use std::net::SocketAddr;

use crate::config::schema::{EngineConfig, LimitConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
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

/// Validate a parsed configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    let sessions = &config.sessions;
    if sessions.extend_lifetime_secs == 0 {
        errors.push(ValidationError::new("sessions.extend_lifetime_secs", "must be > 0"));
    }
    if sessions.max_lifetime_secs < sessions.extend_lifetime_secs {
        errors.push(ValidationError::new(
            "sessions.max_lifetime_secs",
            "must not be shorter than extend_lifetime_secs",
        ));
    }
    if sessions.prune_batch == 0 {
        errors.push(ValidationError::new("sessions.prune_batch", "must be > 0"));
    }
    let cookie = config.server.resolve_name(&sessions.cookie_name);
    let device = config.server.resolve_name(&sessions.device_cookie_name);
    if cookie.is_empty() || device.is_empty() {
        errors.push(ValidationError::new("sessions.cookie_name", "cookie names must not be empty"));
    } else if cookie == device {
        errors.push(ValidationError::new(
            "sessions.device_cookie_name",
            "must differ from the session cookie name",
        ));
    }

    if config.cache.prune_batch == 0 {
        errors.push(ValidationError::new("cache.prune_batch", "must be > 0"));
    }
    if config.cache.prune_interval_ms == 0 {
        errors.push(ValidationError::new("cache.prune_interval_ms", "must be > 0"));
    }

    if let Some(limit) = &config.rate_limit.server {
        validate_limit("rate_limit.server", limit, &mut errors);
    }
    if let Some(limit) = &config.rate_limit.session {
        validate_limit("rate_limit.session", limit, &mut errors);
    }

    if config.messaging.max_wait_secs >= config.timeouts.request_secs {
        errors.push(ValidationError::new(
            "messaging.max_wait_secs",
            "must be shorter than timeouts.request_secs",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
    }

    for (i, page) in config.static_content.iter().enumerate() {
        if !page.path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("static_content[{i}].path"),
                "must start with '/'",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_limit(field: &str, limit: &LimitConfig, errors: &mut Vec<ValidationError>) {
    if limit.count == 0 {
        errors.push(ValidationError::new(format!("{field}.count"), "must be > 0"));
    }
    if limit.duration_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.duration_ms"), "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_long_poll_must_fit_request_timeout() {
        let mut config = EngineConfig::default();
        config.messaging.max_wait_secs = 90;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "messaging.max_wait_secs");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = EngineConfig::default();
        config.rate_limit.session = Some(LimitConfig {
            count: 0,
            duration_ms: 0,
            max_delay_ms: 0,
            max_queue: 0,
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_cookie_names_must_differ() {
        let mut config = EngineConfig::default();
        config.sessions.device_cookie_name = config.sessions.cookie_name.clone();
        assert!(validate_config(&config).is_err());
    }
}
