//! etcd v2 keys API client.
//!
//! # Responsibilities
//! - Recursive reads with the store index (`X-Etcd-Index`)
//! - Long-poll watches (`wait=true&recursive=true&waitIndex=N`)
//! - Key and directory deletes
//!
//! # Design Decisions
//! - Watch requests use a client without a timeout; the long poll may
//!   legitimately hang until the next change
//! - An empty long-poll body (server side timeout) is re-polled instead of
//!   ending the watch. A watch opened "from now" pins itself to the
//!   `X-Etcd-Index` of that first empty poll so later polls miss nothing
//! - Any other watch failure is sent as the last item and ends the stream;
//!   recovery belongs to the caller

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::StoreConfig;
use crate::store::{
    ConfigStore, GetResponse, Node, StoreAction, StoreError, StoreResult, WatchEvent,
    WatchStream, WATCH_BUFFER,
};

const KEY_NOT_FOUND: u32 = 100;
const NOT_A_FILE: u32 = 102;
const NOT_A_DIRECTORY: u32 = 104;
const EVENT_INDEX_CLEARED: u32 = 401;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdNode {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    modified_index: u64,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

impl From<EtcdNode> for Node {
    fn from(node: EtcdNode) -> Self {
        Node {
            key: node.key.unwrap_or_else(|| "/".to_string()),
            value: node.value,
            dir: node.dir,
            modified_index: node.modified_index,
            nodes: node.nodes.into_iter().map(Node::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    action: String,
    node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: u64,
}

/// Outcome of one long-poll round trip.
enum Polled {
    Event(WatchEvent),
    /// An action we do not track; resume after this index.
    Skipped(u64),
    /// The server closed the poll without an event, reporting its index.
    Empty(Option<u64>),
}

/// Config store backed by an etcd v2 cluster member.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    endpoint: String,
    client: Client,
    watch_client: Client,
}

impl EtcdStore {
    /// Create a client for the configured endpoint.
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let watch_client = Client::builder()
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client,
            watch_client,
        })
    }

    fn key_url(&self, key: &str) -> String {
        key_url(&self.endpoint, key)
    }
}

fn key_url(endpoint: &str, key: &str) -> String {
    if key.starts_with('/') {
        format!("{}/v2/keys{}", endpoint, key)
    } else {
        format!("{}/v2/keys/{}", endpoint, key)
    }
}

fn etcd_index(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("x-etcd-index")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

async fn send(request: RequestBuilder) -> StoreResult<Response> {
    request
        .send()
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))
}

/// Turn a non-success response into a [`StoreError`].
async fn error_from(response: Response, key: &str) -> StoreError {
    let status = response.status();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return StoreError::Transport(e.to_string()),
    };
    match serde_json::from_slice::<EtcdErrorBody>(&body) {
        Ok(err) => match err.error_code {
            KEY_NOT_FOUND => StoreError::NotFound(err.cause.unwrap_or_else(|| key.to_string())),
            NOT_A_FILE => StoreError::NotAFile(err.cause.unwrap_or_else(|| key.to_string())),
            NOT_A_DIRECTORY => {
                StoreError::NotADirectory(err.cause.unwrap_or_else(|| key.to_string()))
            }
            EVENT_INDEX_CLEARED => StoreError::HistoryCleared(err.index),
            code => StoreError::Api {
                code,
                message: err.message,
            },
        },
        Err(_) if status == StatusCode::NOT_FOUND => StoreError::NotFound(key.to_string()),
        Err(_) => StoreError::Api {
            code: u32::from(status.as_u16()),
            message: String::from_utf8_lossy(&body).into_owned(),
        },
    }
}

async fn poll_once(request: RequestBuilder, prefix: &str) -> StoreResult<Polled> {
    let response = send(request).await?;
    if !response.status().is_success() {
        return Err(error_from(response, prefix).await);
    }
    let header_index = etcd_index(&response);
    let body = response
        .bytes()
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Polled::Empty(header_index));
    }

    let decoded: EtcdResponse =
        serde_json::from_slice(&body).map_err(|e| StoreError::Decode(e.to_string()))?;
    let node = decoded
        .node
        .ok_or_else(|| StoreError::Decode("watch response without node".to_string()))?;
    let modified_index = node.modified_index;

    match StoreAction::from_etcd(&decoded.action) {
        Some(action) => Ok(Polled::Event(WatchEvent {
            action,
            key: node.key.unwrap_or_default(),
            modified_index,
        })),
        None => Ok(Polled::Skipped(modified_index)),
    }
}

#[async_trait]
impl ConfigStore for EtcdStore {
    async fn get(&self, key: &str, recursive: bool) -> StoreResult<GetResponse> {
        let mut request = self.client.get(self.key_url(key));
        if recursive {
            request = request.query(&[("recursive", "true")]);
        }
        let response = send(request).await?;
        if !response.status().is_success() {
            return Err(error_from(response, key).await);
        }

        let header_index = etcd_index(&response);
        let decoded: EtcdResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let node: Node = decoded
            .node
            .map(Node::from)
            .ok_or_else(|| StoreError::Decode("get response without node".to_string()))?;

        Ok(GetResponse {
            index: header_index.unwrap_or(node.modified_index),
            node,
        })
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let mut request = self.client.delete(self.key_url(key));
        if recursive {
            request = request.query(&[("recursive", "true"), ("dir", "true")]);
        }
        let response = send(request).await?;
        if !response.status().is_success() {
            return Err(error_from(response, key).await);
        }
        Ok(())
    }

    fn watch(&self, prefix: &str, from_index: Option<u64>) -> WatchStream {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let client = self.watch_client.clone();
        let url = self.key_url(prefix);
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            let mut wait_index = from_index;
            tracing::debug!(prefix = %prefix, wait_index = ?wait_index, "etcd watch started");
            loop {
                let mut request = client
                    .get(&url)
                    .query(&[("wait", "true"), ("recursive", "true")]);
                if let Some(index) = wait_index {
                    request = request.query(&[("waitIndex", index.to_string())]);
                }

                let polled = tokio::select! {
                    polled = poll_once(request, &prefix) => polled,
                    _ = tx.closed() => return,
                };

                match polled {
                    Ok(Polled::Event(event)) => {
                        wait_index = Some(event.modified_index + 1);
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Polled::Skipped(index)) => wait_index = Some(index + 1),
                    Ok(Polled::Empty(header_index)) => {
                        if wait_index.is_none() {
                            wait_index = header_index.map(|index| index + 1);
                        }
                    }
                    Err(e) => {
                        let e = match (e, wait_index) {
                            (StoreError::HistoryCleared(_), Some(index)) => {
                                StoreError::HistoryCleared(index)
                            }
                            (e, _) => e,
                        };
                        tracing::warn!(prefix = %prefix, error = %e, "etcd watch ended");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        rx
    }
}
