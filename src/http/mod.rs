//! HTTP protocol implementation.
//!
//! # Architecture
//!
//! - **`connection`**: the per-connection state machine driving reads,
//!   dispatch, writes, keep-alive reuse, and timeouts
//! - **`parser`**: frames and parses requests from the connection buffer
//! - **`request`** / **`response`**: message representations; a response
//!   body is exactly one of in-memory bytes, an open file, or a borrowed
//!   cache entry
//! - **`handler`**: GET/HEAD semantics, conditional validation, content
//!   negotiation, cache population
//! - **`conditional`**: entity tags and If-Modified-Since evaluation
//! - **`mime`**: MIME detection and per-type caching/compression policy
//! - **`writer`**: serializes and transmits responses, streaming file
//!   bodies in chunks
//!
//! # Connection state machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← drain socket, frame pipelined requests in order
//!        └──────┬──────┘
//!               │ request framed
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← resolve, validate, assemble
//!        └──────┬───────────┘
//!               │ response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← send head + body
//!        └──────┬───────────┘
//!               │ sent
//!               ├─ keep-alive → Reading (same connection)
//!               └─ close → Closed
//! ```

pub mod conditional;
pub mod connection;
pub mod handler;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
