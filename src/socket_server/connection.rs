//! WebSocket connection handling
//!
//! Each accepted client gets one [`Connection`] plus two independently
//! scheduled loops:
//!
//! - the read loop pulls frames, parses envelopes and hands them to the
//!   router, in order, one at a time
//! - the write loop drains the connection's bounded outbound queue and sends
//!   periodic pings
//!
//! Either loop failing signals a disconnect to the hub, which closes the
//! connection; closing cancels both loops.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::socket_server::hub::HubHandle;
use crate::socket_server::protocol::{errors, ClientMessage, ServerMessage, ERROR};
use crate::socket_server::router::MessageRouter;

/// Stable identity of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(format!("cli_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a connection currently listens to. A connection holds at most one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Subscription {
    #[default]
    None,
    Root,
    File(String),
}

/// Lifecycle: `Connected -> Closing -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connected = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connected,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Timing and queue settings for a connection
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Maximum silence from the peer before the connection is dropped
    pub read_wait: Duration,
    /// Deadline for a single outbound write
    pub write_wait: Duration,
    /// Interval between pings; shorter than `read_wait`
    pub ping_period: Duration,
    pub outbound_capacity: usize,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            read_wait: config.read_wait(),
            write_wait: config.write_wait(),
            ping_period: config.ping_period(),
            outbound_capacity: config.outbound_capacity,
        }
    }
}

/// Floor for the ping interval; a zero interval is not a valid timer
const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

impl ConnectionSettings {
    /// Ping interval actually used by the write loop
    pub fn effective_ping_period(&self) -> Duration {
        self.ping_period.max(MIN_PING_PERIOD)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

pub type OutboundReceiver = mpsc::Receiver<Arc<ServerMessage>>;

/// One active client session
///
/// Any number of producers may call [`Connection::send`]; only the
/// connection's write loop drains the queue. Sending never blocks: when the
/// queue is full the message is dropped, and after close it is ignored.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Arc<ServerMessage>>,
    /// Guarded so that a subscription switch is a single step
    subscription: Mutex<Subscription>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue
    pub fn new(peer: Option<SocketAddr>, outbound_capacity: usize) -> (Arc<Self>, OutboundReceiver) {
        let (outbound, rx) = mpsc::channel(outbound_capacity.max(1));
        let conn = Arc::new(Self {
            id: ConnectionId::generate(),
            peer,
            outbound,
            subscription: Mutex::new(Subscription::None),
            state: AtomicU8::new(ConnectionState::Connected as u8),
            cancel: CancellationToken::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue a message for delivery
    pub fn send(&self, message: ServerMessage) -> bool {
        self.send_shared(Arc::new(message))
    }

    /// Queue a message shared with other connections. Returns whether it was
    /// accepted by the queue.
    pub fn send_shared(&self, message: Arc<ServerMessage>) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::warn!(
                    connection = %self.id,
                    kind = message.kind(),
                    "Outbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Current subscription
    pub fn subscription(&self) -> Subscription {
        self.subscription.lock().clone()
    }

    /// Name of the subscribed file, if any
    pub fn current_file(&self) -> Option<String> {
        match &*self.subscription.lock() {
            Subscription::File(name) => Some(name.clone()),
            _ => None,
        }
    }

    pub(crate) fn lock_subscription(&self) -> MutexGuard<'_, Subscription> {
        self.subscription.lock()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True once close has been requested
    pub fn is_closed(&self) -> bool {
        self.state() != ConnectionState::Connected
    }

    /// Request close. Only the first call has an effect; it cancels both
    /// loops, which then shut the transport down. Returns whether this call
    /// performed the transition.
    pub fn close(&self) -> bool {
        let first = self
            .state
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if first {
            tracing::debug!(connection = %self.id, "Closing connection");
            self.cancel.cancel();
        }
        first
    }

    /// Transport torn down; terminal state
    pub(crate) fn mark_closed(&self) {
        self.close();
        self.state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// Run both loops of an accepted, registered connection until it closes
pub async fn serve_connection<S>(
    ws: WebSocketStream<S>,
    conn: Arc<Connection>,
    outbound_rx: OutboundReceiver,
    hub: HubHandle,
    router: Arc<MessageRouter>,
    settings: ConnectionSettings,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let writer = tokio::spawn(write_loop(
        sink,
        Arc::clone(&conn),
        outbound_rx,
        hub.clone(),
        settings.clone(),
    ));

    read_loop(stream, Arc::clone(&conn), router, hub, settings.read_wait).await;

    if let Err(e) = writer.await {
        tracing::error!(connection = %conn.id(), "Write loop panicked: {}", e);
    }
    conn.mark_closed();
    tracing::info!(connection = %conn.id(), peer = ?conn.peer(), "Connection closed");
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    conn: Arc<Connection>,
    router: Arc<MessageRouter>,
    hub: HubHandle,
    read_wait: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        // Deadline restarts for every frame, pongs included
        let next = tokio::select! {
            biased;
            _ = conn.cancellation().cancelled() => return,
            next = tokio::time::timeout(read_wait, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::warn!(connection = %conn.id(), "No frame within {:?}, dropping peer", read_wait);
                break;
            }
            Ok(None) => {
                tracing::debug!(connection = %conn.id(), "Stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                if is_closing_error(&e) {
                    tracing::debug!(connection = %conn.id(), "Peer went away: {}", e);
                } else {
                    tracing::warn!(connection = %conn.id(), "Reading client message failed: {}", e);
                }
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    conn.send(ServerMessage::error(
                        ERROR,
                        Value::Null,
                        errors::BAD_EVENT_DATA_FORMAT,
                    ));
                    continue;
                }
            },
            Message::Close(frame) => {
                tracing::debug!(connection = %conn.id(), ?frame, "Client requested close");
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        match ClientMessage::parse(&text) {
            Ok(message) => router.dispatch(&conn, message).await,
            Err(e) => {
                tracing::debug!(connection = %conn.id(), "Bad event data: {}", e);
                conn.send(ServerMessage::error(
                    ERROR,
                    Value::String(text),
                    errors::BAD_EVENT_DATA_FORMAT,
                ));
            }
        }
    }

    hub.disconnect(&conn);
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    conn: Arc<Connection>,
    mut outbound_rx: OutboundReceiver,
    hub: HubHandle,
    settings: ConnectionSettings,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ping_period = settings.effective_ping_period();
    let start = tokio::time::Instant::now() + ping_period;
    let mut ticker = tokio::time::interval_at(start, ping_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = conn.cancellation().cancelled() => break,
            message = outbound_rx.recv() => {
                let Some(message) = message else { break };
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(connection = %conn.id(), "Serializing message failed: {}", e);
                        continue;
                    }
                };

                match tokio::time::timeout(settings.write_wait, sink.send(Message::Text(json))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if is_closing_error(&e) => {
                        tracing::debug!(connection = %conn.id(), "Peer went away: {}", e);
                        hub.disconnect(&conn);
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(connection = %conn.id(), "Sending json failed: {}", e);
                    }
                    Err(_) => {
                        tracing::warn!(connection = %conn.id(), "Write stalled for {:?}, dropping peer", settings.write_wait);
                        hub.disconnect(&conn);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                match tokio::time::timeout(settings.write_wait, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if !is_closing_error(&e) {
                            tracing::warn!(connection = %conn.id(), "Sending ping failed: {}", e);
                        }
                        hub.disconnect(&conn);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(connection = %conn.id(), "Ping stalled for {:?}, dropping peer", settings.write_wait);
                        hub.disconnect(&conn);
                        break;
                    }
                }
            }
        }
    }

    // Nothing may be queued after this point
    outbound_rx.close();
    if let Ok(Err(e)) = tokio::time::timeout(settings.write_wait, sink.close()).await {
        tracing::trace!(connection = %conn.id(), "Closing transport: {}", e);
    }
}

/// Whether a transport error means the peer is gone rather than a fault
pub fn is_closing_error(err: &WsError) -> bool {
    use std::io::ErrorKind;

    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(e) => matches!(
            e.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
