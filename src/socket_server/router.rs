//! Message routing
//!
//! Maps the `type` of an inbound envelope to a handler. Unknown types fall
//! through to a handler that replies with an error; routing itself never
//! fails.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::socket_server::connection::Connection;
use crate::socket_server::emitter::SubscriptionRegistry;
use crate::socket_server::protocol::{
    errors, ClientMessage, FileSubscribeParams, ServerMessage, ERROR, FILE_SUBSCRIBE,
    ROOT_SUBSCRIBE,
};
use crate::watcher::FileStore;

/// Handles one message type for one connection
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// `data` is the envelope payload, `null` when absent
    async fn handle(&self, conn: &Arc<Connection>, data: Value);
}

/// Dispatch table keyed by message type
pub struct MessageRouter {
    handlers: HashMap<&'static str, Box<dyn MessageHandler>>,
    fallback: Box<dyn MessageHandler>,
}

impl MessageRouter {
    /// Router with no registered types; everything gets the unknown-type reply
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Box::new(UnknownTypeHandler),
        }
    }

    /// Router with the built-in subscription handlers
    pub fn new(registry: Arc<SubscriptionRegistry>, store: Arc<dyn FileStore>) -> Self {
        let mut router = Self::empty();
        router.register(
            ROOT_SUBSCRIBE,
            Box::new(RootSubscribeHandler {
                registry: Arc::clone(&registry),
            }),
        );
        router.register(FILE_SUBSCRIBE, Box::new(FileSubscribeHandler { registry, store }));
        router
    }

    pub fn register(&mut self, kind: &'static str, handler: Box<dyn MessageHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub async fn dispatch(&self, conn: &Arc<Connection>, message: ClientMessage) {
        tracing::trace!(connection = %conn.id(), kind = %message.kind, "Routing message");
        let handler = self
            .handlers
            .get(message.kind.as_str())
            .unwrap_or(&self.fallback);
        handler.handle(conn, message.data).await;
    }
}

/// Replies `unknown message type`, echoing the payload
pub struct UnknownTypeHandler;

#[async_trait]
impl MessageHandler for UnknownTypeHandler {
    async fn handle(&self, conn: &Arc<Connection>, data: Value) {
        conn.send(ServerMessage::error(
            ERROR,
            data,
            errors::UNKNOWN_MESSAGE_TYPE,
        ));
    }
}

/// `root_subscribe`: switch to the listing and receive it
pub struct RootSubscribeHandler {
    registry: Arc<SubscriptionRegistry>,
}

#[async_trait]
impl MessageHandler for RootSubscribeHandler {
    async fn handle(&self, conn: &Arc<Connection>, _data: Value) {
        self.registry.subscribe_root(conn);
    }
}

/// `file_subscribe`: switch to one file and receive its content
pub struct FileSubscribeHandler {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<dyn FileStore>,
}

#[async_trait]
impl MessageHandler for FileSubscribeHandler {
    async fn handle(&self, conn: &Arc<Connection>, data: Value) {
        let params: FileSubscribeParams = match serde_json::from_value(data.clone()) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!(connection = %conn.id(), "Parsing params failed: {}", e);
                conn.send(ServerMessage::error(
                    FILE_SUBSCRIBE,
                    data,
                    errors::PARSING_PARAMS_FAILED,
                ));
                return;
            }
        };

        // On failure the current subscription stays as it was
        let content = match self.store.current_file_content(&params.name).await {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(connection = %conn.id(), "{}", e);
                conn.send(ServerMessage::error(
                    FILE_SUBSCRIBE,
                    data,
                    errors::READING_FILE_FAILED,
                ));
                return;
            }
        };

        if self.registry.subscribe_file(conn, &params.name) {
            conn.send(ServerMessage::file_content(content));
        }
    }
}
