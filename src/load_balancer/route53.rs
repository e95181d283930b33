//! DNS record set load balancer.
//!
//! Members are record values. The sync worker never calls the provider: it
//! turns each desired snapshot into a full-set upsert and queues it on the
//! hosted zone's [`ZoneUpdater`](crate::zone::ZoneUpdater).

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::Route53Config;
use crate::entry::{EntryMetadata, LoadBalancerKind};
use crate::load_balancer::{LoadBalancer, Membership, SyncSignal};
use crate::provider::RecordSet;
use crate::store::ConfigStore;
use crate::zone::Change;

async fn run_sync_worker(
    template: RecordSet,
    zone_updates: mpsc::Sender<Change>,
    mut desired: watch::Receiver<BTreeSet<String>>,
) {
    while desired.changed().await.is_ok() {
        let values: Vec<String> = desired.borrow_and_update().iter().cloned().collect();
        let change = Change::upsert(RecordSet {
            values,
            ..template.clone()
        });
        tracing::debug!(name = %template.name, values = ?change.record.values, "Queueing record set change");
        if zone_updates.send(change).await.is_err() {
            tracing::warn!(name = %template.name, "Zone updater gone, stopping sync worker");
            break;
        }
    }
    tracing::debug!(name = %template.name, "Sync worker stopped");
}

/// A record set whose values are the load balancer members.
pub struct Route53 {
    id: String,
    membership: Membership,
    record: Route53Config,
    hosted_zone: String,
    zone_updates: Option<mpsc::Sender<Change>>,
    signal: Option<SyncSignal>,
}

impl Route53 {
    pub fn new(
        id: &str,
        store: Arc<dyn ConfigStore>,
        zone_updates: mpsc::Sender<Change>,
        record: Route53Config,
    ) -> Self {
        Self {
            id: id.to_string(),
            membership: Membership::new(LoadBalancerKind::Route53, store),
            record,
            hosted_zone: String::new(),
            zone_updates: Some(zone_updates),
            signal: None,
        }
    }

    pub fn hosted_zone(&self) -> &str {
        &self.hosted_zone
    }
}

impl LoadBalancer for Route53 {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> LoadBalancerKind {
        LoadBalancerKind::Route53
    }

    fn membership(&self) -> &Membership {
        &self.membership
    }

    fn membership_mut(&mut self) -> &mut Membership {
        &mut self.membership
    }

    fn setup(&mut self, metadata: &EntryMetadata) {
        let Some(zone_updates) = self.zone_updates.take() else {
            return;
        };
        self.membership.bind(metadata);
        self.hosted_zone = metadata.hosted_zone.clone().unwrap_or_default();
        tracing::info!(
            name = %metadata.name,
            hosted_zone = %self.hosted_zone,
            class = %metadata.class,
            config = %self.membership.config_prefix(),
            "Setting up Route53 record set"
        );

        let template = RecordSet {
            name: metadata.name.clone(),
            record_type: self.record.record_type.clone(),
            ttl: self.record.ttl,
            values: Vec::new(),
        };
        let (signal, desired) = SyncSignal::new(LoadBalancerKind::Route53);
        tokio::spawn(run_sync_worker(template, zone_updates, desired));
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
