//! edgeserve - single-process HTTP/WebSocket edge server
//!
//! Core library: readiness engine and worker pool, HTTP parsing, WebSocket
//! framing, the shared file cache and the flat-file user store.

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod store;
pub mod ws;
