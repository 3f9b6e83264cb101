//! WebSocket HTTP handler for the web layer.
//!
//! This module contains only the Axum upgrade handler and the per-connection
//! read/write loops. The registry, protocol and heartbeat live in the `push`
//! crate.

pub mod handler;
