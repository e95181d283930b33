//! Per-zone update serializer.
//!
//! Every DNS load balancer in a hosted zone sends its desired record set to
//! the zone's single [`ZoneUpdater`]. The updater handles one change at a
//! time, so two load balancers sharing a zone never write concurrently.
//!
//! For each change the current record is fetched fresh from the provider and
//! the upsert is skipped when nothing differs. Failures are logged and the
//! change is dropped; the next sync sends a fresh one.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::observability::metrics;
use crate::provider::{RecordSet, RecordSetBackend};

/// Channel capacity between load balancers and their zone updater.
pub const ZONE_UPDATES_BUFFER: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// Create or replace the whole record set.
    Upsert,
}

/// Desired state of one record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub action: ChangeAction,
    pub record: RecordSet,
}

impl Change {
    pub fn upsert(record: RecordSet) -> Self {
        Self {
            action: ChangeAction::Upsert,
            record,
        }
    }
}

/// What a zone updater did with one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneUpdateOutcome {
    Updated,
    Unchanged,
    Failed,
}

impl ZoneUpdateOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ZoneUpdateOutcome::Updated => "updated",
            ZoneUpdateOutcome::Unchanged => "unchanged",
            ZoneUpdateOutcome::Failed => "failed",
        }
    }
}

/// Serializes record set changes for one hosted zone.
pub struct ZoneUpdater {
    hosted_zone: String,
    backend: Arc<dyn RecordSetBackend>,
    updates: mpsc::Receiver<Change>,
}

impl ZoneUpdater {
    pub fn new(
        hosted_zone: String,
        backend: Arc<dyn RecordSetBackend>,
        updates: mpsc::Receiver<Change>,
    ) -> Self {
        Self {
            hosted_zone,
            backend,
            updates,
        }
    }

    /// Spawn an updater task and return the sender load balancers use.
    pub fn spawn(hosted_zone: &str, backend: Arc<dyn RecordSetBackend>) -> mpsc::Sender<Change> {
        let (tx, rx) = mpsc::channel(ZONE_UPDATES_BUFFER);
        let updater = Self::new(hosted_zone.to_string(), backend, rx);
        tokio::spawn(updater.run());
        tx
    }

    /// Process changes until every sender is dropped.
    pub async fn run(mut self) {
        tracing::info!(hosted_zone = %self.hosted_zone, "Zone updater started");
        while let Some(change) = self.updates.recv().await {
            self.apply(&change).await;
        }
        tracing::info!(hosted_zone = %self.hosted_zone, "Zone updater stopped");
    }

    /// Apply one change against the provider.
    pub async fn apply(&self, change: &Change) -> ZoneUpdateOutcome {
        let outcome = self.apply_inner(change).await;
        metrics::record_zone_update(outcome.as_str());
        outcome
    }

    async fn apply_inner(&self, change: &Change) -> ZoneUpdateOutcome {
        let record = &change.record;
        let current = match self.backend.get_record(&self.hosted_zone, &record.name).await {
            Ok(values) => {
                metrics::record_backend_call("get_record", true);
                values
            }
            Err(e) => {
                metrics::record_backend_call("get_record", false);
                tracing::warn!(
                    hosted_zone = %self.hosted_zone,
                    name = %record.name,
                    error = %e,
                    "Failed to read record set, skipping update"
                );
                return ZoneUpdateOutcome::Failed;
            }
        };

        if same_values(&current, &record.values) {
            tracing::debug!(hosted_zone = %self.hosted_zone, name = %record.name, "Nothing to update");
            return ZoneUpdateOutcome::Unchanged;
        }

        tracing::info!(
            hosted_zone = %self.hosted_zone,
            name = %record.name,
            current = ?current,
            desired = ?record.values,
            "Updating record set"
        );
        match self.backend.upsert_record(&self.hosted_zone, record).await {
            Ok(()) => {
                metrics::record_backend_call("upsert_record", true);
                ZoneUpdateOutcome::Updated
            }
            Err(e) => {
                metrics::record_backend_call("upsert_record", false);
                tracing::error!(
                    hosted_zone = %self.hosted_zone,
                    name = %record.name,
                    error = %e,
                    "Record set update failed"
                );
                ZoneUpdateOutcome::Failed
            }
        }
    }
}

/// Record values compare as sets; providers do not preserve order.
fn same_values(current: &[String], desired: &[String]) -> bool {
    let current: BTreeSet<&String> = current.iter().collect();
    let desired: BTreeSet<&String> = desired.iter().collect();
    current == desired
}
