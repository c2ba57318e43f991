//! Graphex Socket Server
//!
//! Streams the contents of a watched directory of data files to WebSocket
//! clients. A client either follows the directory listing or follows one
//! file's parsed content.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         GRAPHEX SOCKET SERVER                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  FileWatcher ──DomainEvent──► SubscriptionRegistry                      │
//! │                                 root set ──► listing broadcasts         │
//! │                                 file sets ─► content broadcasts         │
//! │                                                                         │
//! │  Hub (single task) ──► live connections, connect/disconnect ordering    │
//! │                                                                         │
//! │  Connection per client                                                  │
//! │    read loop  ──► MessageRouter ──► handlers                            │
//! │    write loop ◄── bounded outbound queue, periodic ping                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket:
//!
//! ```json
//! // Client -> Server
//! {"type": "root_subscribe"}
//! {"type": "file_subscribe", "data": {"name": "a.txt"}}
//!
//! // Server -> Client
//! {"type": "root_subscribe", "data": ["a.txt", "b.txt"]}
//! {"type": "file_subscribe", "data": [[1.0, 2.0], [3.0, 4.0]]}
//! {"type": "error", "success": false, "request_data": ..., "error": "unknown message type"}
//! ```
//!
//! A client is subscribed to the listing as soon as it connects.

pub mod connection;
pub mod emitter;
pub mod hub;
pub mod protocol;
pub mod router;
pub mod server;


pub use connection::{Connection, ConnectionId, ConnectionSettings, ConnectionState, Subscription};
pub use emitter::{SubscriberSet, SubscriptionRegistry};
pub use hub::{Hub, HubHandle};
pub use protocol::{ClientMessage, FileSubscribeParams, Payload, ServerMessage};
pub use router::{MessageHandler, MessageRouter};
pub use server::{serve, ServerOptions, SocketServer};
