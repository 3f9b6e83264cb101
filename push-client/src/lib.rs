//! Resilient subscriber for the push service.
//!
//! [`reconnect::Reconnector`] is the transport-free state machine;
//! [`client::spawn`] drives it over a WebSocket with tokio-tungstenite.

pub mod client;
pub mod reconnect;
pub mod token;

pub use client::{spawn, ClientEvent, ClientHandle};
pub use reconnect::{ClientState, Reconnector};
