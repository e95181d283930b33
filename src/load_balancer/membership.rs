//! Membership state shared by every load balancer kind.
//!
//! Owns the class and member set, and arbitrates single-class writes
//! against the config store: the child key with the highest modified index
//! under `<prefix>/single` is the only member, and older siblings are pruned
//! so a restart does not resurrect them.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entry::{Class, EntryMetadata, LoadBalancerKind};
use crate::store::{ConfigStore, StoreError, StoreResult};

/// Desired membership of one load balancer.
pub struct Membership {
    kind: LoadBalancerKind,
    store: Arc<dyn ConfigStore>,
    name: String,
    region: String,
    class: Class,
    config_prefix: String,
    members: BTreeSet<String>,
}

impl Membership {
    /// Unbound membership; [`Membership::bind`] fills it in during setup.
    pub fn new(kind: LoadBalancerKind, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            kind,
            store,
            name: String::new(),
            region: String::new(),
            class: Class::Multiple,
            config_prefix: String::new(),
            members: BTreeSet::new(),
        }
    }

    /// Bind identity, class and store path from the first entry seen.
    pub fn bind(&mut self, metadata: &EntryMetadata) {
        self.name = metadata.name.clone();
        self.region = metadata.region.clone();
        self.class = metadata.class;
        self.config_prefix = metadata.config_prefix.clone();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    pub fn config_prefix(&self) -> &str {
        &self.config_prefix
    }

    fn class_key(&self, class: Class) -> String {
        format!("{}/{}", self.config_prefix, class)
    }

    /// Add a member according to the current class.
    pub async fn add_member(&mut self, member: &str) {
        match self.class {
            Class::Multiple => {
                if self.members.insert(member.to_string()) {
                    tracing::info!(kind = %self.kind, load_balancer = %self.name, member, "Member added");
                }
            }
            Class::Single => self.set_single_member(member).await,
        }
    }

    /// Remove a member; absent members are ignored.
    pub fn remove_member(&mut self, member: &str) {
        if self.members.remove(member) {
            tracing::info!(kind = %self.kind, load_balancer = %self.name, member, "Member removed");
        }
    }

    /// Switch class. A real switch discards the current members and deletes
    /// the abandoned class directory from the store.
    pub async fn set_class(&mut self, class: Class) {
        if self.class == class {
            return;
        }
        let abandoned = self.class_key(self.class);
        self.class = class;
        self.members.clear();
        tracing::info!(
            kind = %self.kind,
            load_balancer = %self.name,
            class = %class,
            "Class changed, members reset"
        );

        match self.store.delete(&abandoned, true).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => tracing::warn!(key = %abandoned, error = %e, "Failed to delete abandoned class"),
        }
    }

    async fn set_single_member(&mut self, member: &str) {
        let children = match self.single_children().await {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(
                    kind = %self.kind,
                    load_balancer = %self.name,
                    member,
                    error = %e,
                    "Cannot resolve latest single member, ignoring"
                );
                return;
            }
        };

        match latest(&children) {
            Some(latest) if latest == member => {}
            latest => {
                tracing::debug!(
                    kind = %self.kind,
                    load_balancer = %self.name,
                    member,
                    latest = ?latest,
                    "Not the latest single member, ignoring"
                );
                return;
            }
        }

        tracing::info!(kind = %self.kind, load_balancer = %self.name, member, "Single member set");
        self.members.clear();
        self.members.insert(member.to_string());

        let class_key = self.class_key(Class::Single);
        for (stale, _) in children.iter().filter(|(child, _)| !child.ends_with(member)) {
            let key = format!("{}/{}", class_key, stale);
            if let Err(e) = self.store.delete(&key, false).await {
                tracing::warn!(key = %key, error = %e, "Failed to prune stale single member");
            }
        }
    }

    /// Members under the single class directory with their modified indices.
    async fn single_children(&self) -> StoreResult<Vec<(String, u64)>> {
        let class_key = self.class_key(Class::Single);
        let response = match self.store.get(&class_key, false).await {
            Ok(response) => response,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let prefix = format!("{}/", class_key);
        Ok(response
            .node
            .nodes
            .iter()
            .filter(|child| !child.dir)
            .filter_map(|child| {
                child
                    .key
                    .strip_prefix(&prefix)
                    .map(|member| (member.to_string(), child.modified_index))
            })
            .collect())
    }
}

/// Highest modified index wins; ties go to the lexically greatest member.
fn latest(children: &[(String, u64)]) -> Option<&str> {
    children
        .iter()
        .max_by(|(a, a_index), (b, b_index)| a_index.cmp(b_index).then_with(|| a.cmp(b)))
        .map(|(member, _)| member.as_str())
}
