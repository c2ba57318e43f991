//! Common test utilities and fixtures for graphex integration tests
//!
//! This module provides:
//! - `TestDir` builder for creating watched directories with data files
//! - `TestServer` running the full watcher + socket server on an ephemeral port
//! - `TestClient`, a WebSocket client with JSON helpers and timeouts

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod client;

pub use client::{listing_names, TestClient, TestServer, RECV_TIMEOUT};
pub use test_dir::{data_content, TestDir};
