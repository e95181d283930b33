//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config
//! file. Every section has defaults, so an empty file is a valid config.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration for the load balancer manager.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Config store connection and tree root.
    pub store: StoreConfig,

    /// Record set parameters for DNS load balancers.
    pub route53: Route53Config,

    /// Which provider receives membership changes, and its credentials.
    pub provider: ProviderConfig,

    /// Watch recovery settings.
    pub watch: WatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Config store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store service address (e.g., "http://localhost:4001").
    pub endpoint: String,

    /// Root of the desired-state tree.
    pub root: String,

    /// Timeout for non-watch requests in seconds.
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4001".to_string(),
            root: "/lbManager".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl StoreConfig {
    /// Root path without trailing slashes.
    pub fn normalized_root(&self) -> String {
        self.root.trim_end_matches('/').to_string()
    }
}

/// DNS record set parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Route53Config {
    /// TTL of managed record sets in seconds.
    pub ttl: u32,

    /// Record type written for managed record sets.
    pub record_type: String,
}

impl Default for Route53Config {
    fn default() -> Self {
        Self {
            ttl: 60,
            record_type: "A".to_string(),
        }
    }
}

/// How provider calls are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderMode {
    /// Log intended changes and apply them to in-memory state only.
    #[default]
    DryRun,
    /// Call the AWS ELB and Route53 APIs.
    Aws,
}

impl std::str::FromStr for ProviderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dry-run" => Ok(ProviderMode::DryRun),
            "aws" => Ok(ProviderMode::Aws),
            other => Err(format!("unknown provider mode '{}', expected dry-run or aws", other)),
        }
    }
}

/// Provider selection and credentials.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub mode: ProviderMode,

    /// AWS access key id.
    pub access_key_id: String,

    /// AWS secret access key.
    pub secret_access_key: String,

    /// Timeout of a single provider request in seconds.
    pub request_timeout_secs: u64,

    /// Override of the ELB endpoint, used for every region.
    pub elb_endpoint: Option<String>,

    /// Override of the Route53 endpoint.
    pub route53_endpoint: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::DryRun,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            request_timeout_secs: 10,
            elb_endpoint: None,
            route53_endpoint: None,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("mode", &self.mode)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("elb_endpoint", &self.elb_endpoint)
            .field("route53_endpoint", &self.route53_endpoint)
            .finish()
    }
}

/// Watch reconnection backoff.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay before the first re-open in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Upper bound of the re-open delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: ManagerConfig = toml::from_str("").unwrap();
        assert_eq!(config.store.endpoint, "http://localhost:4001");
        assert_eq!(config.store.root, "/lbManager");
        assert_eq!(config.route53.ttl, 60);
        assert_eq!(config.route53.record_type, "A");
        assert!(!config.observability.metrics_enabled);
        assert_eq!(config.provider.mode, ProviderMode::DryRun);
    }

    #[test]
    fn test_provider_section() {
        let config: ManagerConfig = toml::from_str(
            r#"
            [provider]
            mode = "aws"
            access_key_id = "AKID"
            secret_access_key = "hunter2"
            route53_endpoint = "http://127.0.0.1:4566"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.mode, ProviderMode::Aws);
        assert_eq!(config.provider.access_key_id, "AKID");
        assert_eq!(config.provider.elb_endpoint, None);
        assert_eq!(config.provider.request_timeout_secs, 10);

        let debug = format!("{:?}", config.provider);
        assert!(debug.contains("AKID"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_provider_mode_from_str() {
        assert_eq!("aws".parse::<ProviderMode>(), Ok(ProviderMode::Aws));
        assert_eq!("dry-run".parse::<ProviderMode>(), Ok(ProviderMode::DryRun));
        assert!("gcp".parse::<ProviderMode>().is_err());
    }

    #[test]
    fn test_partial_section() {
        let config: ManagerConfig = toml::from_str(
            r#"
            [store]
            root = "/lb/"

            [route53]
            ttl = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.store.endpoint, "http://localhost:4001");
        assert_eq!(config.store.normalized_root(), "/lb");
        assert_eq!(config.route53.ttl, 30);
        assert_eq!(config.route53.record_type, "A");
    }
}
