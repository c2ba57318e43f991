//! Graphex: live plot data over WebSocket
//!
//! Watches a directory of text data files (one header line, then rows of
//! space-separated numbers) and streams it to WebSocket clients. Clients
//! follow either the directory listing or a single file's parsed points, and
//! get a fresh snapshot on every change.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use graphex::config::WatcherConfig;
//! use graphex::socket_server::{serve, ServerOptions};
//! use graphex::watcher::{FileStore, FileWatcher};
//! use tokio_util::sync::CancellationToken;
//!
//! let shutdown = CancellationToken::new();
//! let watcher = Arc::new(FileWatcher::new("./data", WatcherConfig::default()));
//! let events = watcher.domain_events().expect("fresh watcher");
//! let _handle = watcher.start(&shutdown)?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8081").await?;
//! serve(listener, watcher as Arc<dyn FileStore>, events, ServerOptions::default(), shutdown).await?;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod socket_server;
pub mod watcher;

pub use cli::Cli;
pub use config::GraphexConfig;
pub use error::{GraphexError, Result};
pub use watcher::{DomainEvent, FileData, FileStore, FileWatcher};
