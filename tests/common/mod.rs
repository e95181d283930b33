//! Shared harness for driving the manager end to end against in-memory
//! store and provider, plus a programmable HTTP backend standing in for
//! etcd and the cloud APIs.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use lb_manager::provider::MemoryProvider;
use lb_manager::store::MemoryStore;
use lb_manager::{Manager, ManagerConfig, Shutdown};

pub const ROOT: &str = "/lbManager";

/// Config with a short watch backoff.
pub fn test_config() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.store.root = ROOT.to_string();
    config.watch.reconnect_base_delay_ms = 10;
    config.watch.reconnect_max_delay_ms = 50;
    config
}

pub fn key(path: &str) -> String {
    format!("{}/{}", ROOT, path)
}

/// A manager running on its own task.
pub struct Running {
    pub store: MemoryStore,
    pub provider: MemoryProvider,
    shutdown: Shutdown,
    handle: JoinHandle<Manager>,
}

impl Running {
    pub fn start(store: &MemoryStore, provider: &MemoryProvider) -> Self {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let mut manager = Manager::new(
            test_config(),
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
        );
        let handle = tokio::spawn(async move {
            manager.run(rx).await;
            manager
        });
        Self {
            store: store.clone(),
            provider: provider.clone(),
            shutdown,
            handle,
        }
    }

    /// Stop the control loop and hand back the manager for inspection.
    /// Workers keep running until the returned manager is dropped.
    pub async fn stop(self) -> Manager {
        self.shutdown.trigger();
        self.handle.await.expect("manager task panicked")
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Give in-flight workers a moment to make calls they should not make.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// A request as seen by the programmable backend.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    /// First value of a query parameter, decoded.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.target.split_once('?')?.1;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// First value of a form-encoded body parameter.
    pub fn form(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response the programmable backend writes back.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Handle on a running programmable backend.
pub struct MockServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<MockRequest>>>,
}

impl MockServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(MockRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Start a programmable mock backend on an ephemeral port. Every request is
/// recorded, then answered by `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockServer
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        recorded.lock().unwrap().push(request.clone());
                        let response = f(request).await;
                        let status_text = match response.status {
                            200 => "OK",
                            400 => "Bad Request",
                            403 => "Forbidden",
                            404 => "Not Found",
                            500 => "Internal Server Error",
                            _ => "Unknown",
                        };

                        let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, status_text);
                        for (name, value) in &response.headers {
                            head.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        head.push_str(&format!(
                            "Content-Length: {}\r\nConnection: close\r\n\r\n",
                            response.body.len()
                        ));
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(response.body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockServer { addr, requests }
}

/// Serve `scripted` responses in order, then hold every later request open
/// like an idle long poll.
pub async fn start_scripted_backend(scripted: Vec<MockResponse>) -> MockServer {
    let scripted = Arc::new(Mutex::new(scripted.into_iter()));
    start_programmable_backend(move |_| {
        let next = scripted.lock().unwrap().next();
        async move {
            match next {
                Some(response) => response,
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    MockResponse::new(200, "")
                }
            }
        }
    })
    .await
}
