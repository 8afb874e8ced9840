//! Rampart - edge-caching HTTP/1.1 static content server.
//!
//! A supervisor process launches N single-threaded worker processes sharing
//! one port via `SO_REUSEPORT`. Each worker runs its own accept loop,
//! connection state machines, response cache, and per-IP rate limiter.

pub mod accesslog;
pub mod cache;
pub mod compress;
pub mod config;
pub mod http;
pub mod limiter;
pub mod pool;
pub mod resolve;
pub mod server;
