//! Instance registration load balancer.
//!
//! The sync worker diffs desired members against the instances the provider
//! reports and issues one deregister per extra instance and one register per
//! missing one. Calls are independent: a failed call is logged and the
//! rest still run. A failed listing abandons the cycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::entry::{EntryMetadata, LoadBalancerKind};
use crate::load_balancer::{LoadBalancer, Membership, SyncSignal};
use crate::observability::metrics;
use crate::provider::{MembershipBackend, ProviderFactory, ProviderResult};
use crate::store::ConfigStore;

/// Calls issued by one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Bring a provider load balancer's instances in line with `desired`.
pub async fn reconcile_members(
    backend: &dyn MembershipBackend,
    load_balancer: &str,
    desired: &BTreeSet<String>,
) -> ProviderResult<SyncReport> {
    let actual: BTreeSet<String> = match backend.list_members(load_balancer).await {
        Ok(actual) => {
            metrics::record_backend_call("list_members", true);
            actual.into_iter().collect()
        }
        Err(e) => {
            metrics::record_backend_call("list_members", false);
            return Err(e);
        }
    };
    tracing::debug!(load_balancer, actual = ?actual, desired = ?desired, "Instances in provider");

    let mut report = SyncReport::default();

    for instance in actual.difference(desired) {
        match backend.remove_member(load_balancer, instance).await {
            Ok(()) => {
                metrics::record_backend_call("remove_member", true);
                tracing::info!(load_balancer, instance = %instance, "Instance deregistered");
                report.removed += 1;
            }
            Err(e) => {
                metrics::record_backend_call("remove_member", false);
                tracing::error!(load_balancer, instance = %instance, error = %e, "Failed to deregister instance");
                report.failed += 1;
            }
        }
    }

    for instance in desired.difference(&actual) {
        match backend.add_member(load_balancer, instance).await {
            Ok(()) => {
                metrics::record_backend_call("add_member", true);
                tracing::info!(load_balancer, instance = %instance, "Instance registered");
                report.added += 1;
            }
            Err(e) => {
                metrics::record_backend_call("add_member", false);
                tracing::error!(load_balancer, instance = %instance, error = %e, "Failed to register instance");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

async fn run_sync_worker(
    name: String,
    backend: Arc<dyn MembershipBackend>,
    mut desired: watch::Receiver<BTreeSet<String>>,
) {
    while desired.changed().await.is_ok() {
        let members = desired.borrow_and_update().clone();
        tracing::debug!(load_balancer = %name, members = ?members, "Syncing");
        match reconcile_members(backend.as_ref(), &name, &members).await {
            Ok(report) => tracing::debug!(load_balancer = %name, report = ?report, "Sync finished"),
            Err(e) => tracing::warn!(load_balancer = %name, error = %e, "Sync abandoned"),
        }
    }
    tracing::debug!(load_balancer = %name, "Sync worker stopped");
}

/// An instance registration group.
pub struct Elb {
    id: String,
    membership: Membership,
    providers: Arc<dyn ProviderFactory>,
    signal: Option<SyncSignal>,
}

impl Elb {
    pub fn new(id: &str, store: Arc<dyn ConfigStore>, providers: Arc<dyn ProviderFactory>) -> Self {
        Self {
            id: id.to_string(),
            membership: Membership::new(LoadBalancerKind::Elb, store),
            providers,
            signal: None,
        }
    }
}

impl LoadBalancer for Elb {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> LoadBalancerKind {
        LoadBalancerKind::Elb
    }

    fn membership(&self) -> &Membership {
        &self.membership
    }

    fn membership_mut(&mut self) -> &mut Membership {
        &mut self.membership
    }

    fn setup(&mut self, metadata: &EntryMetadata) {
        if self.signal.is_some() {
            return;
        }
        self.membership.bind(metadata);
        tracing::info!(
            load_balancer = %metadata.name,
            region = %self.membership.region(),
            class = %metadata.class,
            config = %self.membership.config_prefix(),
            "Setting up ELB"
        );

        let backend = self.providers.membership_backend(self.membership.region());
        let (signal, desired) = SyncSignal::new(LoadBalancerKind::Elb);
        tokio::spawn(run_sync_worker(metadata.name.clone(), backend, desired));
        self.signal = Some(signal);
    }

    fn sync(&mut self) {
        match self.signal.as_mut() {
            Some(signal) => signal.request(self.membership.members()),
            None => tracing::warn!(id = %self.id, "Sync requested before setup"),
        }
    }

    fn sync_requests(&self) -> u64 {
        self.signal.as_ref().map_or(0, SyncSignal::requested)
    }
}
