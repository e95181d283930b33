//! In-memory provider.
//!
//! Implements both provider capabilities against local state. Every call is
//! recorded, failures can be injected per operation, and an artificial
//! latency makes overlapping calls observable. The binary uses it as a
//! dry-run provider: intended changes are logged and applied locally.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{
    MembershipBackend, ProviderError, ProviderFactory, ProviderResult, RecordSet,
    RecordSetBackend,
};

/// Provider operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListMembers,
    AddMember,
    RemoveMember,
    GetRecord,
    UpsertRecord,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    ListMembers { load_balancer: String },
    AddMember { load_balancer: String, member: String },
    RemoveMember { load_balancer: String, member: String },
    GetRecord { zone: String, name: String },
    UpsertRecord { zone: String, record: RecordSet },
}

impl ProviderCall {
    pub fn operation(&self) -> Operation {
        match self {
            ProviderCall::ListMembers { .. } => Operation::ListMembers,
            ProviderCall::AddMember { .. } => Operation::AddMember,
            ProviderCall::RemoveMember { .. } => Operation::RemoveMember,
            ProviderCall::GetRecord { .. } => Operation::GetRecord,
            ProviderCall::UpsertRecord { .. } => Operation::UpsertRecord,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<String, BTreeSet<String>>,
    records: BTreeMap<(String, String), RecordSet>,
    calls: Vec<ProviderCall>,
    failures: HashMap<Operation, usize>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    latency: Duration,
    upserts_in_flight: AtomicUsize,
    max_upserts_in_flight: AtomicUsize,
}

/// Shared in-memory provider. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    shared: Arc<Shared>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every call takes `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                latency,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `call`, consuming an injected failure for its operation if any.
    fn begin(&self, call: ProviderCall) -> ProviderResult<()> {
        let operation = call.operation();
        let mut state = self.state();
        state.calls.push(call);
        if let Some(remaining) = state.failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Api(format!("injected {:?} failure", operation)));
            }
        }
        Ok(())
    }

    async fn delay(&self) {
        if !self.shared.latency.is_zero() {
            tokio::time::sleep(self.shared.latency).await;
        }
    }

    /// Seed registered instances for a load balancer.
    pub fn register_instances(&self, load_balancer: &str, members: &[&str]) {
        let mut state = self.state();
        let registered = state.instances.entry(load_balancer.to_string()).or_default();
        registered.extend(members.iter().map(|m| m.to_string()));
    }

    /// Instances registered with a load balancer, sorted.
    pub fn instances(&self, load_balancer: &str) -> Vec<String> {
        self.state()
            .instances
            .get(load_balancer)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Seed a record set.
    pub fn put_record(&self, zone: &str, record: RecordSet) {
        self.state()
            .records
            .insert((zone.to_string(), record.name.clone()), record);
    }

    /// Current record set, if any.
    pub fn record(&self, zone: &str, name: &str) -> Option<RecordSet> {
        self.state()
            .records
            .get(&(zone.to_string(), name.to_string()))
            .cloned()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Number of calls made for one operation.
    pub fn count(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// Make the next `times` calls of `operation` fail.
    pub fn fail_next(&self, operation: Operation, times: usize) {
        self.state().failures.insert(operation, times);
    }

    /// Highest number of upserts observed running at the same time.
    pub fn max_concurrent_upserts(&self) -> usize {
        self.shared.max_upserts_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipBackend for MemoryProvider {
    async fn list_members(&self, load_balancer: &str) -> ProviderResult<Vec<String>> {
        self.begin(ProviderCall::ListMembers {
            load_balancer: load_balancer.to_string(),
        })?;
        self.delay().await;
        Ok(self.instances(load_balancer))
    }

    async fn add_member(&self, load_balancer: &str, member: &str) -> ProviderResult<()> {
        self.begin(ProviderCall::AddMember {
            load_balancer: load_balancer.to_string(),
            member: member.to_string(),
        })?;
        self.delay().await;
        tracing::info!(load_balancer, member, "dry-run: registered instance");
        self.state()
            .instances
            .entry(load_balancer.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_member(&self, load_balancer: &str, member: &str) -> ProviderResult<()> {
        self.begin(ProviderCall::RemoveMember {
            load_balancer: load_balancer.to_string(),
            member: member.to_string(),
        })?;
        self.delay().await;
        tracing::info!(load_balancer, member, "dry-run: deregistered instance");
        if let Some(registered) = self.state().instances.get_mut(load_balancer) {
            registered.remove(member);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSetBackend for MemoryProvider {
    async fn get_record(&self, zone: &str, name: &str) -> ProviderResult<Vec<String>> {
        self.begin(ProviderCall::GetRecord {
            zone: zone.to_string(),
            name: name.to_string(),
        })?;
        self.delay().await;
        Ok(self
            .record(zone, name)
            .map(|record| record.values)
            .unwrap_or_default())
    }

    async fn upsert_record(&self, zone: &str, record: &RecordSet) -> ProviderResult<()> {
        self.begin(ProviderCall::UpsertRecord {
            zone: zone.to_string(),
            record: record.clone(),
        })?;

        let in_flight = self.shared.upserts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .max_upserts_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        self.delay().await;
        tracing::info!(zone, name = %record.name, values = ?record.values, "dry-run: upserted record set");
        self.put_record(zone, record.clone());
        self.shared.upserts_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ProviderFactory for MemoryProvider {
    fn membership_backend(&self, _region: &str) -> Arc<dyn MembershipBackend> {
        Arc::new(self.clone())
    }

    fn record_set_backend(&self, _region: &str) -> Arc<dyn RecordSetBackend> {
        Arc::new(self.clone())
    }
}
