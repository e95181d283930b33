//! Load balancer entities.
//!
//! # Data Flow
//! ```text
//! Manager apply path (single task):
//!     set_class → add_member / remove_member → sync
//!         → membership.rs (class + member set, single-class arbitration)
//!         → SyncSignal (coalescing watch channel, never blocks)
//!
//! Per load balancer sync worker (own task):
//!     elb.rs     → list / add / remove against MembershipBackend
//!     route53.rs → Change → ZoneUpdater channel
//! ```
//!
//! # Design Decisions
//! - The manager holds `Box<dyn LoadBalancer>` only, never a concrete kind
//! - Desired members travel to the worker as a snapshot; workers never see
//!   the live set
//! - Sync requests coalesce: a worker busy with one reconciliation picks up
//!   only the latest snapshot afterwards

pub mod elb;
pub mod membership;
pub mod route53;

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::entry::{Class, EntryMetadata, LoadBalancerKind};
use crate::observability::metrics;

pub use elb::Elb;
pub use membership::Membership;
pub use route53::Route53;

/// One externally managed routing target.
#[async_trait]
pub trait LoadBalancer: Send {
    fn id(&self) -> &str;

    fn kind(&self) -> LoadBalancerKind;

    fn membership(&self) -> &Membership;

    fn membership_mut(&mut self) -> &mut Membership;

    /// One-time initialization: bind metadata, obtain provider clients and
    /// start the sync worker. Later calls are ignored.
    fn setup(&mut self, metadata: &EntryMetadata);

    /// Hand the current desired members to the sync worker. Never blocks.
    fn sync(&mut self);

    /// Number of sync requests made so far.
    fn sync_requests(&self) -> u64;

    fn class(&self) -> Class {
        self.membership().class()
    }

    /// Current desired members, sorted.
    fn members(&self) -> Vec<String> {
        self.membership().members().iter().cloned().collect()
    }

    async fn add_member(&mut self, member: &str) {
        self.membership_mut().add_member(member).await
    }

    fn remove_member(&mut self, member: &str) {
        self.membership_mut().remove_member(member)
    }

    async fn set_class(&mut self, class: Class) {
        self.membership_mut().set_class(class).await
    }
}

/// Sending half of a load balancer's sync channel.
#[derive(Debug)]
pub struct SyncSignal {
    kind: LoadBalancerKind,
    tx: watch::Sender<BTreeSet<String>>,
    requested: u64,
}

impl SyncSignal {
    pub fn new(kind: LoadBalancerKind) -> (Self, watch::Receiver<BTreeSet<String>>) {
        let (tx, rx) = watch::channel(BTreeSet::new());
        (
            Self {
                kind,
                tx,
                requested: 0,
            },
            rx,
        )
    }

    /// Publish a desired member snapshot, replacing any not yet picked up.
    pub fn request(&mut self, desired: &BTreeSet<String>) {
        self.requested += 1;
        self.tx.send_replace(desired.clone());
        metrics::record_sync_requested(self.kind.as_str());
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_signal_coalesces() {
        let (mut signal, mut rx) = SyncSignal::new(LoadBalancerKind::Elb);

        signal.request(&BTreeSet::from(["a".to_string()]));
        signal.request(&BTreeSet::from(["a".to_string(), "b".to_string()]));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 2);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(signal.requested(), 2);
    }

    #[tokio::test]
    async fn test_dropping_signal_ends_worker_loop() {
        let (signal, mut rx) = SyncSignal::new(LoadBalancerKind::Route53);
        drop(signal);
        assert!(rx.changed().await.is_err());
    }
}
