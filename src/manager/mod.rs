//! Control loop.
//!
//! # Data Flow
//! ```text
//! startup:
//!     reader.rs  get(root, recursive) → ReadEvent::Key ... → ReadEvent::Done
//!         → apply(ReadingConfig) per key, no sync
//!         → one sync per load balancer
//!         → watch(root, index + 1)
//!
//! steady state:
//!     WatchEvent → KeyParser → apply(Set | Delete) → sync
//!
//! watch closed:
//!     backoff delay → watch(root, last seen index + 1)
//!     history cleared → watch(root, from now)
//! ```
//!
//! # Design Decisions
//! - One task owns every load balancer; membership is never shared
//! - Provider calls happen on sync workers and zone updaters, never here
//! - The initial read runs once. Re-opened watches resume after the last
//!   event seen; only when the store no longer holds that history do they
//!   start from the current server state
//! - The first reopen after a delivered event is immediate

pub mod reader;

use std::collections::HashMap;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Sleep};

use crate::config::ManagerConfig;
use crate::entry::{ConfigEntry, EntryAction, KeyParser, LoadBalancerKind};
use crate::load_balancer::{Elb, LoadBalancer, Route53};
use crate::observability::metrics;
use crate::provider::ProviderFactory;
use crate::resilience::Backoff;
use crate::store::{ConfigStore, StoreError, StoreResult, WatchEvent, WatchStream};
use crate::zone::{Change, ZoneUpdater};

use self::reader::ReadEvent;

/// Owns the load balancer registry and drives it from the config store.
pub struct Manager {
    config: ManagerConfig,
    store: Arc<dyn ConfigStore>,
    providers: Arc<dyn ProviderFactory>,
    parser: KeyParser,
    load_balancers: HashMap<String, Box<dyn LoadBalancer>>,
    zone_updaters: HashMap<String, mpsc::Sender<Change>>,
    backoff: Backoff,
}

async fn next_read(reads: &mut Option<mpsc::Receiver<ReadEvent>>) -> Option<ReadEvent> {
    match reads {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_event(watch: &mut Option<WatchStream>) -> Option<StoreResult<WatchEvent>> {
    match watch {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn reopen_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        store: Arc<dyn ConfigStore>,
        providers: Arc<dyn ProviderFactory>,
    ) -> Self {
        let parser = KeyParser::new(&config.store.normalized_root());
        let backoff = Backoff::from_config(&config.watch);
        Self {
            config,
            store,
            providers,
            parser,
            load_balancers: HashMap::new(),
            zone_updaters: HashMap::new(),
            backoff,
        }
    }

    /// Run until `shutdown` fires. Workers keep running until the manager
    /// itself is dropped.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        let root = self.parser.root().to_string();
        tracing::info!(root = %root, "Manager starting");

        let mut reads = Some(reader::spawn(self.store.clone(), root.clone()));
        let mut watch: Option<WatchStream> = None;
        let mut reopen: Option<Pin<Box<Sleep>>> = None;
        // Index the next watch starts from; `None` means "from now".
        let mut resume: Option<u64> = None;

        loop {
            tokio::select! {
                read = next_read(&mut reads) => match read {
                    Some(ReadEvent::Key(key)) => {
                        if let Some(entry) = self.parser.parse(&key, EntryAction::ReadingConfig) {
                            self.apply(entry).await;
                        }
                    }
                    Some(ReadEvent::Done { index }) => {
                        reads = None;
                        tracing::info!(
                            load_balancers = self.load_balancers.len(),
                            index = ?index,
                            "Initial read complete"
                        );
                        self.sync_all();
                        resume = index.map(|i| i + 1);
                        watch = Some(self.store.watch(&root, resume));
                    }
                    Some(ReadEvent::Unavailable(e)) => {
                        reads = None;
                        tracing::warn!(error = %e, "Config store unavailable, continuing with watch only");
                        watch = Some(self.store.watch(&root, None));
                    }
                    None => {
                        reads = None;
                        tracing::warn!("Initial read ended early, continuing with watch only");
                        watch = Some(self.store.watch(&root, None));
                    }
                },
                event = next_event(&mut watch) => match event {
                    Some(Ok(event)) => {
                        self.backoff.reset();
                        resume = Some(event.modified_index + 1);
                        self.handle_event(event).await;
                    }
                    Some(Err(StoreError::HistoryCleared(index))) => {
                        tracing::warn!(index, "Watch history cleared, resuming from current state");
                        resume = None;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Watch failed");
                    }
                    None => {
                        watch = None;
                        let delay = self.backoff.next_delay();
                        tracing::warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = self.backoff.attempt(),
                            resume = ?resume,
                            "Watch closed, re-opening"
                        );
                        reopen = Some(Box::pin(sleep(delay)));
                    }
                },
                _ = reopen_due(&mut reopen) => {
                    reopen = None;
                    metrics::record_watch_reopen();
                    watch = Some(self.store.watch(&root, resume));
                }
                _ = shutdown.recv() => {
                    tracing::info!("Manager received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: WatchEvent) {
        match self.parser.parse(&event.key, EntryAction::from(event.action)) {
            Some(entry) => self.apply(entry).await,
            None => tracing::trace!(key = %event.key, "Ignoring key"),
        }
    }

    /// Apply one entry to its load balancer, creating it on first sight.
    pub async fn apply(&mut self, entry: ConfigEntry) {
        metrics::record_config_entry(entry.action.as_str());
        tracing::debug!(
            id = %entry.load_balancer_id,
            action = entry.action.as_str(),
            member = %entry.member,
            "Applying entry"
        );

        if !self.load_balancers.contains_key(&entry.load_balancer_id) {
            let load_balancer = self.create(&entry);
            self.load_balancers
                .insert(entry.load_balancer_id.clone(), load_balancer);
            metrics::set_load_balancers(self.load_balancers.len());
        }
        let Some(load_balancer) = self.load_balancers.get_mut(&entry.load_balancer_id) else {
            return;
        };

        load_balancer.set_class(entry.metadata.class).await;
        match entry.action {
            EntryAction::ReadingConfig => load_balancer.add_member(&entry.member).await,
            EntryAction::Set => {
                load_balancer.add_member(&entry.member).await;
                load_balancer.sync();
            }
            EntryAction::Delete => {
                load_balancer.remove_member(&entry.member);
                load_balancer.sync();
            }
        }
    }

    fn create(&mut self, entry: &ConfigEntry) -> Box<dyn LoadBalancer> {
        tracing::info!(id = %entry.load_balancer_id, kind = %entry.kind, "New load balancer");
        let mut load_balancer: Box<dyn LoadBalancer> = match entry.kind {
            LoadBalancerKind::Elb => Box::new(Elb::new(
                &entry.load_balancer_id,
                self.store.clone(),
                self.providers.clone(),
            )),
            LoadBalancerKind::Route53 => {
                let hosted_zone = entry.metadata.hosted_zone.as_deref().unwrap_or_default();
                let zone_updates = self.zone_updater(hosted_zone, &entry.metadata.region);
                Box::new(Route53::new(
                    &entry.load_balancer_id,
                    self.store.clone(),
                    zone_updates,
                    self.config.route53.clone(),
                ))
            }
        };
        load_balancer.setup(&entry.metadata);
        load_balancer
    }

    /// Sender of the hosted zone's updater, spawning it on first use.
    fn zone_updater(&mut self, hosted_zone: &str, region: &str) -> mpsc::Sender<Change> {
        let providers = &self.providers;
        self.zone_updaters
            .entry(hosted_zone.to_string())
            .or_insert_with(|| ZoneUpdater::spawn(hosted_zone, providers.record_set_backend(region)))
            .clone()
    }

    fn sync_all(&mut self) {
        for load_balancer in self.load_balancers.values_mut() {
            tracing::debug!(id = %load_balancer.id(), kind = %load_balancer.kind(), "Initial sync");
            load_balancer.sync();
        }
    }

    pub fn load_balancer(&self, id: &str) -> Option<&dyn LoadBalancer> {
        self.load_balancers.get(id).map(|lb| lb.as_ref())
    }

    pub fn load_balancer_count(&self) -> usize {
        self.load_balancers.len()
    }

    pub fn zone_count(&self) -> usize {
        self.zone_updaters.len()
    }
}
