//! End-to-end tests against a running server

mod broadcast;
mod protocol;
