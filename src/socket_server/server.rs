//! WebSocket listener
//!
//! Wires the watcher's event stream, the subscription registry, the hub and
//! the router together, and accepts clients until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{GraphexError, Result};
use crate::socket_server::connection::{serve_connection, Connection, ConnectionSettings};
use crate::socket_server::emitter::SubscriptionRegistry;
use crate::socket_server::hub::{Hub, HubHandle};
use crate::socket_server::router::MessageRouter;
use crate::watcher::{DomainEvent, FileStore};

/// Options that do not come from the watcher
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Only upgrades on this request path are accepted
    pub path: String,
    pub connection: ConnectionSettings,
}

impl ServerOptions {
    pub fn new(server: &ServerConfig, connection: ConnectionSettings) -> Self {
        Self {
            path: server.path.clone(),
            connection,
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new(&ServerConfig::default(), ConnectionSettings::default())
    }
}

/// Shared state for connection tasks
#[derive(Clone)]
struct ConnectionContext {
    hub: HubHandle,
    router: Arc<MessageRouter>,
    settings: ConnectionSettings,
    path: Arc<str>,
}

/// A running server, bound but not yet accepting
pub struct SocketServer {
    listener: TcpListener,
    registry: Arc<SubscriptionRegistry>,
    hub: Hub,
    context: ConnectionContext,
}

impl SocketServer {
    pub fn new(listener: TcpListener, store: Arc<dyn FileStore>, options: ServerOptions) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&store)));
        let (hub, handle) = Hub::new(Arc::clone(&registry));
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry), store));

        Self {
            listener,
            registry,
            hub,
            context: ConnectionContext {
                hub: handle,
                router,
                settings: options.connection,
                path: Arc::from(options.path.as_str()),
            },
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for inspecting live connections
    pub fn hub(&self) -> HubHandle {
        self.context.hub.clone()
    }

    /// Accept clients and deliver `events` until `shutdown` is cancelled
    pub async fn run(
        self,
        events: mpsc::Receiver<DomainEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let Self {
            listener,
            registry,
            hub,
            context,
        } = self;

        let hub_task = tokio::spawn(hub.run(shutdown.clone()));
        let dispatch_task = tokio::spawn(registry.run(events, shutdown.clone()));

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(stream, peer, context.clone()));
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        if let Err(e) = hub_task.await {
            tracing::error!("Hub task failed: {}", e);
        }
        if let Err(e) = dispatch_task.await {
            tracing::error!("Dispatch task failed: {}", e);
        }
        Ok(())
    }
}

/// Convenience wrapper around [`SocketServer`]
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn FileStore>,
    events: mpsc::Receiver<DomainEvent>,
    options: ServerOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    SocketServer::new(listener, store, options)
        .run(events, shutdown)
        .await
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ConnectionContext) {
    let _ = stream.set_nodelay(true);

    let path = Arc::clone(&ctx.path);
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == &*path {
            Ok(response)
        } else {
            tracing::debug!(%peer, path = request.uri().path(), "Rejecting upgrade");
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(%peer, "WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (conn, outbound_rx) = Connection::new(Some(peer), ctx.settings.outbound_capacity);
    match ctx.hub.connect(Arc::clone(&conn)).await {
        Ok(()) => {}
        Err(GraphexError::ShuttingDown) => {
            tracing::debug!(%peer, "Connection refused, server is shutting down");
            return;
        }
        Err(e) => {
            tracing::warn!(%peer, "Connection refused: {}", e);
            return;
        }
    }

    serve_connection(ws, conn, outbound_rx, ctx.hub, ctx.router, ctx.settings).await;
}
