//! Initial full read of the desired-state tree.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::store::{ConfigStore, StoreError};

/// Keys are streamed in batches through a bounded channel.
pub const READ_BUFFER: usize = 64;

/// Progress of the initial read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A key found in the tree, directories included.
    Key(String),

    /// The read finished. `index` is the store index it observed, absent
    /// when the tree does not exist yet.
    Done { index: Option<u64> },

    /// The store could not be read.
    Unavailable(StoreError),
}

/// Read `root` recursively on a separate task.
pub fn spawn(store: Arc<dyn ConfigStore>, root: String) -> mpsc::Receiver<ReadEvent> {
    let (tx, rx) = mpsc::channel(READ_BUFFER);
    tokio::spawn(async move {
        tracing::info!(root = %root, "Reading existing configuration");
        let done = match store.get(&root, true).await {
            Ok(response) => {
                for key in response.node.keys() {
                    if tx.send(ReadEvent::Key(key.to_string())).await.is_err() {
                        return;
                    }
                }
                ReadEvent::Done {
                    index: Some(response.index),
                }
            }
            Err(StoreError::NotFound(_)) => {
                tracing::info!(root = %root, "No configuration yet");
                ReadEvent::Done { index: None }
            }
            Err(e) => ReadEvent::Unavailable(e),
        };
        let _ = tx.send(done).await;
    });
    rx
}
