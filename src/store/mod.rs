//! Config store capability.
//!
//! # Data Flow
//! ```text
//! Manager startup:
//!     get(root, recursive) → Node tree + store index
//!     watch(root, index + 1) → WatchStream of WatchEvent
//!
//! Load balancers (single class arbitration):
//!     get(prefix/class) → children with modified indices
//!     delete(stale key) / delete(abandoned class, recursive)
//! ```
//!
//! # Design Decisions
//! - A watch is a channel receiver; a closed stream is the failure signal and
//!   the Manager re-opens it from the index after the last event it saw
//! - Every write carries a monotonically increasing modified index, used for
//!   "most recent wins" comparisons

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// Capacity of the channel between a watch task and its consumer.
pub const WATCH_BUFFER: usize = 64;

/// Errors returned by a config store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The requested watch index is older than the retained history.
    #[error("watch history cleared before index {0}")]
    HistoryCleared(u64),

    /// A file operation targeted a directory.
    #[error("{0} is a directory")]
    NotAFile(String),

    /// A key was written below an existing file.
    #[error("{0} is not a directory")]
    NotADirectory(String),

    /// Connection or HTTP failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with an error document.
    #[error("store error {code}: {message}")]
    Api { code: u32, message: String },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One node of the config tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub key: String,
    pub value: Option<String>,
    pub dir: bool,
    pub modified_index: u64,
    pub nodes: Vec<Node>,
}

impl Node {
    /// Iterate over every key in this subtree, depth first, this node included.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            keys.push(node.key.as_str());
            // Reverse so children come out in their stored order.
            stack.extend(node.nodes.iter().rev());
        }
        keys
    }
}

/// Response of a `get`.
#[derive(Debug, Clone)]
pub struct GetResponse {
    pub node: Node,
    /// Store index at the time of the read.
    pub index: u64,
}

/// Kind of change delivered by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    Set,
    Delete,
}

impl StoreAction {
    /// Map an etcd action name. Unknown actions (e.g. `get`) yield `None`.
    pub fn from_etcd(action: &str) -> Option<Self> {
        match action {
            "set" | "create" | "update" | "compareAndSwap" => Some(StoreAction::Set),
            "delete" | "expire" | "compareAndDelete" => Some(StoreAction::Delete),
            _ => None,
        }
    }
}

/// A single change observed on the watched subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: StoreAction,
    pub key: String,
    pub modified_index: u64,
}

/// Receiving end of a watch. `None` from `recv` means the watch ended; an
/// `Err` item, when present, is the last one and says why.
pub type WatchStream = mpsc::Receiver<StoreResult<WatchEvent>>;

/// Hierarchical, watch-capable key-value store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a key, and its subtree when `recursive` is set. Without
    /// `recursive`, a directory is returned with its direct children only.
    async fn get(&self, key: &str, recursive: bool) -> StoreResult<GetResponse>;

    /// Delete a key, or a whole directory when `recursive` is set.
    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()>;

    /// Stream changes below `prefix`. With `from_index`, changes at or after
    /// that index are delivered; without it, only changes from now on. A
    /// `from_index` older than the retained history ends the stream with
    /// [`StoreError::HistoryCleared`].
    fn watch(&self, prefix: &str, from_index: Option<u64>) -> WatchStream;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &str) -> Node {
        Node {
            key: key.into(),
            value: Some(String::new()),
            ..Default::default()
        }
    }

    #[test]
    fn test_keys_depth_first_in_order() {
        let tree = Node {
            key: "/a".into(),
            dir: true,
            nodes: vec![
                Node {
                    key: "/a/b".into(),
                    dir: true,
                    nodes: vec![leaf("/a/b/c"), leaf("/a/b/d")],
                    ..Default::default()
                },
                leaf("/a/e"),
            ],
            ..Default::default()
        };
        assert_eq!(tree.keys(), vec!["/a", "/a/b", "/a/b/c", "/a/b/d", "/a/e"]);
    }

    #[test]
    fn test_action_mapping() {
        assert_eq!(StoreAction::from_etcd("set"), Some(StoreAction::Set));
        assert_eq!(StoreAction::from_etcd("compareAndSwap"), Some(StoreAction::Set));
        assert_eq!(StoreAction::from_etcd("expire"), Some(StoreAction::Delete));
        assert_eq!(StoreAction::from_etcd("get"), None);
    }
}
