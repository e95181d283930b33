//! In-process config store.
//!
//! Keeps a flat ordered map of leaf keys and synthesizes directories on
//! read, like etcd does for its v2 tree. Used by the test suite and for
//! running the manager without a cluster.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::store::{
    ConfigStore, GetResponse, Node, StoreAction, StoreError, StoreResult, WatchEvent,
    WatchStream, WATCH_BUFFER,
};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Leaf {
    value: String,
    modified_index: u64,
}

#[derive(Debug, Default)]
struct State {
    index: u64,
    leaves: BTreeMap<String, Leaf>,
    history: Vec<WatchEvent>,
    /// Events at or below this index are no longer replayable.
    compacted: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
    disconnect: broadcast::Sender<()>,
    unavailable: AtomicBool,
    get_calls: AtomicUsize,
    watch_opens: AtomicUsize,
}

/// Thread-safe in-memory store. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn dir_prefix(key: &str) -> String {
    if key == "/" {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

fn is_under(prefix: &str, key: &str) -> bool {
    prefix == "/" || key == prefix || key.starts_with(&dir_prefix(prefix))
}

/// Build a directory node from the leaves below it.
fn build_dir(key: &str, leaves: &[(&String, &Leaf)], recursive: bool) -> Node {
    let prefix = dir_prefix(key);
    let mut children: BTreeMap<String, Vec<(&String, &Leaf)>> = BTreeMap::new();
    for (leaf_key, leaf) in leaves {
        let Some(rest) = leaf_key.strip_prefix(prefix.as_str()) else {
            continue;
        };
        let segment = rest.split('/').next().unwrap_or(rest);
        children
            .entry(format!("{}{}", prefix, segment))
            .or_default()
            .push((leaf_key, leaf));
    }

    let nodes = children
        .into_iter()
        .map(|(child_key, below)| match below.as_slice() {
            [(leaf_key, leaf)] if **leaf_key == child_key => Node {
                key: child_key,
                value: Some(leaf.value.clone()),
                dir: false,
                modified_index: leaf.modified_index,
                nodes: Vec::new(),
            },
            _ if recursive => build_dir(&child_key, &below, true),
            _ => Node {
                modified_index: max_index(&below),
                key: child_key,
                dir: true,
                ..Default::default()
            },
        })
        .collect();

    Node {
        key: key.to_string(),
        value: None,
        dir: true,
        modified_index: max_index(leaves),
        nodes,
    }
}

fn max_index(leaves: &[(&String, &Leaf)]) -> u64 {
    leaves
        .iter()
        .map(|(_, leaf)| leaf.modified_index)
        .max()
        .unwrap_or_default()
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (disconnect, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                events,
                disconnect,
                unavailable: AtomicBool::new(false),
                get_calls: AtomicUsize::new(0),
                watch_opens: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the map itself consistent.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, state: &mut State, action: StoreAction, key: String) -> u64 {
        let event = WatchEvent {
            action,
            key,
            modified_index: state.index,
        };
        state.history.push(event.clone());
        let _ = self.shared.events.send(event);
        state.index
    }

    /// Write a key and return its modified index.
    ///
    /// Like etcd, a key that is already a directory cannot become a file,
    /// and no key can be created below an existing file.
    pub fn set(&self, key: &str, value: &str) -> StoreResult<u64> {
        let key = normalize(key);
        let mut state = self.state();

        let children = dir_prefix(&key);
        if state
            .leaves
            .range(children.clone()..)
            .next()
            .is_some_and(|(leaf_key, _)| leaf_key.starts_with(&children))
        {
            return Err(StoreError::NotAFile(key));
        }
        let mut parent = key.as_str();
        while let Some(end) = parent.rfind('/').filter(|end| *end > 0) {
            parent = &key[..end];
            if state.leaves.contains_key(parent) {
                return Err(StoreError::NotADirectory(parent.to_string()));
            }
        }

        state.index += 1;
        let modified_index = state.index;
        state.leaves.insert(
            key.clone(),
            Leaf {
                value: value.to_string(),
                modified_index,
            },
        );
        Ok(self.record(&mut state, StoreAction::Set, key))
    }

    /// Whether a leaf key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.state().leaves.contains_key(&normalize(key))
    }

    /// Leaf keys at or below `prefix`, in order.
    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize(prefix);
        self.state()
            .leaves
            .keys()
            .filter(|key| is_under(&prefix, key))
            .cloned()
            .collect()
    }

    /// Current store index.
    pub fn index(&self) -> u64 {
        self.state().index
    }

    /// Make reads fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// End every open watch stream, as a dropped connection would.
    pub fn disconnect_watchers(&self) {
        let _ = self.shared.disconnect.send(());
    }

    /// Forget every event recorded so far. Watches asking to start at or
    /// before the current index end with [`StoreError::HistoryCleared`].
    pub fn clear_history(&self) {
        let mut state = self.state();
        state.history.clear();
        state.compacted = state.index;
    }

    /// Number of `get` calls served so far.
    pub fn get_calls(&self) -> usize {
        self.shared.get_calls.load(Ordering::SeqCst)
    }

    /// Number of watches opened so far.
    pub fn watch_opens(&self) -> usize {
        self.shared.watch_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str, recursive: bool) -> StoreResult<GetResponse> {
        self.shared.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("store unavailable".to_string()));
        }

        let key = normalize(key);
        let state = self.state();
        if let Some(leaf) = state.leaves.get(&key) {
            return Ok(GetResponse {
                node: Node {
                    key,
                    value: Some(leaf.value.clone()),
                    dir: false,
                    modified_index: leaf.modified_index,
                    nodes: Vec::new(),
                },
                index: state.index,
            });
        }

        let below: Vec<(&String, &Leaf)> = state
            .leaves
            .iter()
            .filter(|(leaf_key, _)| is_under(&key, leaf_key))
            .collect();
        if below.is_empty() {
            return Err(StoreError::NotFound(key));
        }

        Ok(GetResponse {
            node: build_dir(&key, &below, recursive),
            index: state.index,
        })
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let key = normalize(key);
        let mut state = self.state();

        if state.leaves.remove(&key).is_some() {
            state.index += 1;
            self.record(&mut state, StoreAction::Delete, key);
            return Ok(());
        }

        let below: Vec<String> = state
            .leaves
            .keys()
            .filter(|leaf_key| is_under(&key, leaf_key))
            .cloned()
            .collect();
        if below.is_empty() {
            return Err(StoreError::NotFound(key));
        }
        if !recursive {
            return Err(StoreError::NotAFile(key));
        }

        for leaf_key in below {
            state.leaves.remove(&leaf_key);
        }
        // One event for the directory, as etcd reports recursive deletes.
        state.index += 1;
        self.record(&mut state, StoreAction::Delete, key);
        Ok(())
    }

    fn watch(&self, prefix: &str, from_index: Option<u64>) -> WatchStream {
        let prefix = normalize(prefix);
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);

        // Subscribe under the lock so no event falls between backlog and live feed.
        let (backlog, mut events) = {
            let state = self.state();
            let backlog: StoreResult<Vec<WatchEvent>> = match from_index {
                Some(from) if from <= state.compacted => Err(StoreError::HistoryCleared(from)),
                Some(from) => Ok(state
                    .history
                    .iter()
                    .filter(|event| event.modified_index >= from && is_under(&prefix, &event.key))
                    .cloned()
                    .collect()),
                None => Ok(Vec::new()),
            };
            (backlog, self.shared.events.subscribe())
        };
        let mut disconnect = self.shared.disconnect.subscribe();
        self.shared.watch_opens.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let backlog = match backlog {
                Ok(backlog) => backlog,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            for event in backlog {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            let ended = loop {
                // A dropped connection loses whatever was still in flight.
                tokio::select! {
                    biased;
                    _ = disconnect.recv() => {
                        break StoreError::Transport("watch disconnected".to_string());
                    }
                    received = events.recv() => match received {
                        Ok(event) if is_under(&prefix, &event.key) => {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(prefix = %prefix, skipped, "memory watch lagged, closing");
                            break StoreError::Transport("watch lagged".to_string());
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = tx.closed() => return,
                }
            };
            let _ = tx.send(Err(ended)).await;
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_leaf_and_directories() {
        let store = MemoryStore::new();
        store.set("/root/elb/us-east-1/web/multiple/i-1", "").unwrap();
        let i2 = store.set("/root/elb/us-east-1/web/multiple/i-2", "").unwrap();

        let leaf = store.get("/root/elb/us-east-1/web/multiple/i-2", false).await.unwrap();
        assert!(!leaf.node.dir);
        assert_eq!(leaf.node.modified_index, i2);

        let shallow = store.get("/root/elb", false).await.unwrap();
        assert_eq!(shallow.node.nodes.len(), 1);
        assert!(shallow.node.nodes[0].dir);
        assert!(shallow.node.nodes[0].nodes.is_empty());

        let deep = store.get("/root", true).await.unwrap();
        assert_eq!(deep.index, i2);
        let keys = deep.node.keys();
        assert!(keys.contains(&"/root/elb/us-east-1/web/multiple/i-1"));
        assert!(keys.contains(&"/root/elb/us-east-1/web/multiple"));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        let err = store.get("/nope", true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_delete_requires_recursive() {
        let store = MemoryStore::new();
        store.set("/a/b/c", "").unwrap();
        store.set("/a/b/d", "").unwrap();

        let err = store.delete("/a/b", false).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAFile(_)));

        store.delete("/a/b", true).await.unwrap();
        assert!(store.keys_under("/a").is_empty());
    }

    #[tokio::test]
    async fn test_watch_replays_from_index_and_streams() {
        let store = MemoryStore::new();
        store.set("/other/x", "").unwrap();
        let first = store.set("/root/a", "").unwrap();

        let mut watch = store.watch("/root", Some(first));
        store.set("/root/b", "").unwrap();
        store.delete("/root/a", false).await.unwrap();

        let replayed = watch.recv().await.unwrap().unwrap();
        assert_eq!(replayed.key, "/root/a");
        assert_eq!(replayed.action, StoreAction::Set);
        assert_eq!(watch.recv().await.unwrap().unwrap().key, "/root/b");
        let deleted = watch.recv().await.unwrap().unwrap();
        assert_eq!(deleted.action, StoreAction::Delete);
        assert_eq!(deleted.key, "/root/a");
    }

    #[tokio::test]
    async fn test_recursive_delete_emits_single_directory_event() {
        let store = MemoryStore::new();
        store.set("/root/lb/multiple/a", "").unwrap();
        store.set("/root/lb/multiple/b", "").unwrap();

        let mut watch = store.watch("/root", None);
        store.delete("/root/lb/multiple", true).await.unwrap();

        let event = watch.recv().await.unwrap().unwrap();
        assert_eq!(event.key, "/root/lb/multiple");
        assert_eq!(event.action, StoreAction::Delete);
    }

    #[tokio::test]
    async fn test_disconnect_closes_streams() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/root", None);
        // Give the watch task a chance to start waiting.
        tokio::task::yield_now().await;
        store.disconnect_watchers();
        assert!(matches!(watch.recv().await, Some(Err(StoreError::Transport(_)))));
        assert!(watch.recv().await.is_none());
        assert_eq!(store.watch_opens(), 1);
    }

    #[tokio::test]
    async fn test_watch_before_cleared_history_ends_with_error() {
        let store = MemoryStore::new();
        let first = store.set("/root/a", "").unwrap();
        store.clear_history();
        let second = store.set("/root/b", "").unwrap();

        let mut stale = store.watch("/root", Some(first));
        assert_eq!(stale.recv().await, Some(Err(StoreError::HistoryCleared(first))));
        assert!(stale.recv().await.is_none());

        let mut fresh = store.watch("/root", Some(second));
        assert_eq!(fresh.recv().await.unwrap().unwrap().key, "/root/b");
    }

    #[tokio::test]
    async fn test_set_rejects_file_directory_conflicts() {
        let store = MemoryStore::new();
        store.set("/a/b", "").unwrap();

        assert_eq!(store.set("/a", ""), Err(StoreError::NotAFile("/a".into())));
        assert_eq!(
            store.set("/a/b/c", ""),
            Err(StoreError::NotADirectory("/a/b".into()))
        );
        assert_eq!(store.keys_under("/"), vec!["/a/b"]);

        let root = store.get("/", true).await.unwrap();
        assert_eq!(root.node.keys(), vec!["/", "/a", "/a/b"]);
    }
}
