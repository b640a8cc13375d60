//! HTTP/1.1 protocol implementation.
//!
//! This module implements the HTTP side of the server: turning bytes read
//! from a socket into a [`request::Request`] and responses back into bytes.
//!
//! # Architecture
//!
//! - **`parser`**: Request line / header parsing and body sizing rules
//! - **`request`**: Borrowed request representation, headers, quality values
//! - **`form`**: URL-encoded query string and form body parsing
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//! - **`mime`**: MIME type table keyed by file extension
//!
//! # Request lifecycle
//!
//! ```text
//!        ┌──────────────────┐
//!        │   Reading head   │ ← drain socket into the worker buffer
//!        └──────┬───────────┘
//!               │ blank line seen
//!               ▼
//!        ┌──────────────────┐
//!        │   Sizing body    │ ← Content-Length rules, maybe await more
//!        └──────┬───────────┘
//!               │ body complete
//!               ▼
//!        ┌──────────────────┐
//!        │   Routing        │ ← login / static / websocket upgrade
//!        └──────┬───────────┘
//!               │ response written
//!               ├─ Upgrade → WebSocket frames on the same socket
//!               └─ otherwise → Closed
//! ```

pub mod form;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
