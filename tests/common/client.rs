//! Full server harness and WebSocket test client

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use graphex::config::WatcherConfig;
use graphex::socket_server::{ConnectionSettings, HubHandle, ServerOptions, SocketServer};
use graphex::watcher::WatcherHandle;
use graphex::{FileStore, FileWatcher};

/// Default wait for an expected message; generous for slow CI filesystems
pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Watcher plus socket server bound to an ephemeral local port
pub struct TestServer {
    pub addr: SocketAddr,
    hub: HubHandle,
    shutdown: CancellationToken,
    _watch: WatcherHandle,
    task: Option<JoinHandle<graphex::Result<()>>>,
}

impl TestServer {
    pub async fn start(dir: &Path) -> Self {
        Self::start_with(dir, ConnectionSettings::default()).await
    }

    pub async fn start_with(dir: &Path, settings: ConnectionSettings) -> Self {
        let shutdown = CancellationToken::new();

        let watcher = Arc::new(FileWatcher::new(dir, WatcherConfig::default()));
        let events = watcher
            .domain_events()
            .expect("Fresh watcher has an event stream");
        let watch = watcher.start(&shutdown).expect("Failed to start watcher");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let options = ServerOptions {
            path: "/ws".to_string(),
            connection: settings,
        };
        let server = SocketServer::new(listener, watcher as Arc<dyn FileStore>, options);
        let addr = server.local_addr().expect("Listener has an address");
        let hub = server.hub();
        let task = tokio::spawn(server.run(events, shutdown.clone()));

        Self {
            addr,
            hub,
            shutdown,
            _watch: watch,
            task: Some(task),
        }
    }

    pub fn url(&self) -> String {
        self.url_for("/ws")
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }

    /// Poll until the hub reports `expected` connections
    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = Instant::now() + RECV_TIMEOUT;
        while Instant::now() < deadline {
            if self.connection_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "Expected {} connections, hub reports {}",
            expected,
            self.connection_count()
        );
    }

    /// Connect a client and consume its initial listing snapshot
    pub async fn connect(&self) -> (TestClient, Value) {
        let mut client = TestClient::connect(&self.url()).await;
        let snapshot = client.recv_json().await;
        assert_eq!(snapshot["type"], "root_subscribe", "first message: {}", snapshot);
        (client, snapshot)
    }

    /// Cancel the shutdown token and wait for the server to finish
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            tokio::time::timeout(RECV_TIMEOUT, task)
                .await
                .expect("Server did not stop in time")
                .expect("Server task panicked")
                .expect("Server returned an error");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// WebSocket client speaking JSON text frames
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        Self::try_connect(url).await.expect("Failed to connect")
    }

    pub async fn try_connect(url: &str) -> Result<Self, tungstenite::Error> {
        let (ws, _response) = connect_async(url).await?;
        Ok(Self { ws })
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("Failed to send frame");
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) {
        self.ws
            .send(Message::Binary(bytes.to_vec()))
            .await
            .expect("Failed to send frame");
    }

    /// Next JSON message, panicking if none arrives in time
    pub async fn recv_json(&mut self) -> Value {
        self.recv_json_within(RECV_TIMEOUT)
            .await
            .expect("Timed out waiting for a message")
    }

    /// Next JSON message within `wait`, or `None`. Control frames are skipped
    /// (reading keeps answering pings).
    pub async fn recv_json_within(&mut self, wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.ws.next()).await {
                Err(_) => return None,
                Ok(None) => panic!("Connection ended while waiting for a message"),
                Ok(Some(Err(e))) => panic!("Connection failed while waiting for a message: {}", e),
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(&text).expect("Server sent invalid JSON"))
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    panic!("Server closed while waiting for a message: {:?}", frame)
                }
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Skip messages until one matches `predicate`
    pub async fn recv_until(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        let deadline = Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_json_within(remaining).await {
                Some(value) if predicate(&value) => return value,
                Some(_) => continue,
                None => panic!("No matching message within {:?}", RECV_TIMEOUT),
            }
        }
    }

    /// Assert that no message of `kind` arrives within `wait`
    pub async fn expect_no_message_of(&mut self, kind: &str, wait: Duration) {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_json_within(remaining).await {
                Some(value) => assert_ne!(value["type"], kind, "unexpected message: {}", value),
                None => return,
            }
        }
    }

    /// Read until the server ends the connection. Returns false on timeout.
    pub async fn wait_closed(&mut self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.ws.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// File names in a listing message, sorted
pub fn listing_names(message: &Value) -> Vec<String> {
    let mut names: Vec<String> = message["data"]
        .as_array()
        .expect("listing data is an array")
        .iter()
        .map(|name| name.as_str().expect("file names are strings").to_string())
        .collect();
    names.sort();
    names
}
