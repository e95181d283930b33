//! Provider capabilities: the external systems whose membership is managed.
//!
//! # Data Flow
//! ```text
//! Elb sync worker
//!     → MembershipBackend (list / add / remove registered instances)
//!
//! Route53 sync worker → ZoneUpdater
//!     → RecordSetBackend (get current values / upsert record set)
//! ```
//!
//! # Design Decisions
//! - Clients are obtained per region from a `ProviderFactory`, so the
//!   manager never names a concrete provider
//! - Every call is independent; failures are reported, never retried here
//! - Two factories exist: `AwsProvider` for the real APIs and
//!   `MemoryProvider` for dry runs and tests

pub mod aws;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use aws::AwsProvider;
pub use memory::MemoryProvider;

/// Errors returned by provider calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The target (load balancer or hosted zone) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The provider rejected or failed the call.
    #[error("provider API error: {0}")]
    Api(String),
}

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A complete DNS record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    pub name: String,
    pub record_type: String,
    pub ttl: u32,
    pub values: Vec<String>,
}

/// Load balancer whose instances are registered one by one.
#[async_trait]
pub trait MembershipBackend: Send + Sync {
    /// Instances currently registered with `load_balancer`.
    async fn list_members(&self, load_balancer: &str) -> ProviderResult<Vec<String>>;

    /// Register one instance.
    async fn add_member(&self, load_balancer: &str, member: &str) -> ProviderResult<()>;

    /// Deregister one instance.
    async fn remove_member(&self, load_balancer: &str, member: &str) -> ProviderResult<()>;
}

/// DNS zone whose record sets are replaced as a whole.
#[async_trait]
pub trait RecordSetBackend: Send + Sync {
    /// Current values of record `name` in `zone`; empty when the record is absent.
    async fn get_record(&self, zone: &str, name: &str) -> ProviderResult<Vec<String>>;

    /// Create or replace a record set.
    async fn upsert_record(&self, zone: &str, record: &RecordSet) -> ProviderResult<()>;
}

/// Hands out provider clients per region.
pub trait ProviderFactory: Send + Sync {
    fn membership_backend(&self, region: &str) -> Arc<dyn MembershipBackend>;

    fn record_set_backend(&self, region: &str) -> Arc<dyn RecordSetBackend>;
}
