//! Configuration validation.
//!
//! Semantic checks only; serde handles the syntax. Returns every problem
//! found rather than stopping at the first.

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{ManagerConfig, ProviderMode};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("store.root must be an absolute path below '/', got '{0}'")]
    InvalidRoot(String),

    #[error("store.endpoint is not an http(s) URL: '{0}'")]
    InvalidEndpoint(String),

    #[error("route53.ttl must be greater than zero")]
    ZeroTtl,

    #[error("route53.record_type must not be empty")]
    EmptyRecordType,

    #[error("watch.reconnect_base_delay_ms ({base}) exceeds reconnect_max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("observability.metrics_address is not a socket address: '{0}'")]
    InvalidMetricsAddress(String),

    #[error("provider mode aws needs access_key_id and secret_access_key")]
    MissingCredentials,

    #[error("provider endpoint is not an http(s) URL: '{0}'")]
    InvalidProviderEndpoint(String),

    #[error("provider.request_timeout_secs must be greater than zero")]
    ZeroProviderTimeout,
}

fn is_http_url(value: &str) -> bool {
    matches!(Url::parse(value), Ok(url) if matches!(url.scheme(), "http" | "https"))
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ManagerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let root = config.store.normalized_root();
    if !root.starts_with('/') || root.len() < 2 {
        errors.push(ValidationError::InvalidRoot(config.store.root.clone()));
    }

    if !is_http_url(&config.store.endpoint) {
        errors.push(ValidationError::InvalidEndpoint(config.store.endpoint.clone()));
    }

    if config.route53.ttl == 0 {
        errors.push(ValidationError::ZeroTtl);
    }
    if config.route53.record_type.trim().is_empty() {
        errors.push(ValidationError::EmptyRecordType);
    }

    let base = config.watch.reconnect_base_delay_ms;
    let max = config.watch.reconnect_max_delay_ms;
    if base > max {
        errors.push(ValidationError::BackoffRange { base, max });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let provider = &config.provider;
    if provider.mode == ProviderMode::Aws
        && (provider.access_key_id.is_empty() || provider.secret_access_key.is_empty())
    {
        errors.push(ValidationError::MissingCredentials);
    }
    for endpoint in [&provider.elb_endpoint, &provider.route53_endpoint]
        .into_iter()
        .flatten()
    {
        if !is_http_url(endpoint) {
            errors.push(ValidationError::InvalidProviderEndpoint(endpoint.clone()));
        }
    }
    if provider.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroProviderTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ManagerConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ManagerConfig::default();
        config.store.root = "lbManager".into();
        config.store.endpoint = "localhost:4001".into();
        config.route53.ttl = 0;
        config.watch.reconnect_base_delay_ms = 5_000;
        config.watch.reconnect_max_delay_ms = 100;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ZeroTtl));
        assert!(errors.contains(&ValidationError::BackoffRange { base: 5_000, max: 100 }));
    }

    #[test]
    fn test_bare_slash_root_rejected() {
        let mut config = ManagerConfig::default();
        config.store.root = "/".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidRoot("/".into())]);
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = ManagerConfig::default();
        config.observability.metrics_address = "not-an-address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_aws_mode_requires_credentials() {
        let mut config = ManagerConfig::default();
        config.provider.mode = ProviderMode::Aws;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::MissingCredentials]
        );

        config.provider.access_key_id = "AKID".into();
        config.provider.secret_access_key = "secret".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_provider_endpoint_overrides_checked() {
        let mut config = ManagerConfig::default();
        config.provider.elb_endpoint = Some("localhost:4566".into());
        config.provider.route53_endpoint = Some("http://localhost:4566".into());
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::InvalidProviderEndpoint("localhost:4566".into())]
        );
    }
}
