//! Connection registry
//!
//! The hub owns the set of live connections. Lifecycle requests are
//! processed one at a time by a single task, so the set needs no lock and
//! connect/disconnect for the same connection are totally ordered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{GraphexError, Result};
use crate::socket_server::connection::{Connection, ConnectionId};
use crate::socket_server::emitter::SubscriptionRegistry;

enum LifecycleEvent {
    Connect {
        conn: Arc<Connection>,
        ack: oneshot::Sender<Result<()>>,
    },
    Disconnect(ConnectionId),
}

/// The registry task. Create with [`Hub::new`] and drive with [`Hub::run`].
pub struct Hub {
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    clients: HashMap<ConnectionId, Arc<Connection>>,
    registry: Arc<SubscriptionRegistry>,
    count: Arc<AtomicUsize>,
}

/// Cloneable handle used by the server and by connections
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<LifecycleEvent>,
    count: Arc<AtomicUsize>,
}

impl Hub {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicUsize::new(0));
        let hub = Self {
            events: rx,
            clients: HashMap::new(),
            registry,
            count: Arc::clone(&count),
        };
        (hub, HubHandle { events: tx, count })
    }

    /// Process lifecycle requests until shutdown, then close every connection
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        self.close_all();
    }

    fn handle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Connect { conn, ack } => {
                if conn.is_closed() {
                    let _ = ack.send(Err(GraphexError::ConnectionClosed {
                        id: conn.id().to_string(),
                    }));
                    return;
                }

                self.clients.insert(conn.id().clone(), Arc::clone(&conn));
                self.update_count();
                tracing::info!(
                    connection = %conn.id(),
                    peer = ?conn.peer(),
                    clients = self.clients.len(),
                    "Client connected"
                );

                self.registry.subscribe_root(&conn);
                let _ = ack.send(Ok(()));
            }
            LifecycleEvent::Disconnect(id) => match self.clients.remove(&id) {
                Some(conn) => {
                    conn.close();
                    self.registry.remove_connection(&conn);
                    self.update_count();
                    tracing::info!(
                        connection = %id,
                        clients = self.clients.len(),
                        "Client disconnected"
                    );
                }
                None => tracing::trace!(connection = %id, "Already disconnected"),
            },
        }
    }

    fn close_all(&mut self) {
        self.events.close();
        let closing = self.clients.len();
        for (_, conn) in self.clients.drain() {
            conn.close();
            self.registry.remove_connection(&conn);
        }
        self.update_count();
        tracing::info!(closed = closing, "Hub stopped");
    }

    fn update_count(&self) {
        self.count.store(self.clients.len(), Ordering::SeqCst);
    }
}

impl HubHandle {
    /// Register a connection and subscribe it to the listing.
    ///
    /// Resolves once the registration is complete, so the connection's
    /// initial snapshot is already queued when this returns.
    pub async fn connect(&self, conn: Arc<Connection>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.events
            .send(LifecycleEvent::Connect { conn, ack })
            .map_err(|_| GraphexError::ShuttingDown)?;
        done.await.map_err(|_| GraphexError::ShuttingDown)?
    }

    /// Request removal of a connection. Safe to call more than once.
    pub fn disconnect(&self, conn: &Arc<Connection>) {
        let sent = self
            .events
            .send(LifecycleEvent::Disconnect(conn.id().clone()))
            .is_ok();
        if !sent {
            // Hub already stopped; it has released everything it held
            conn.close();
        }
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
