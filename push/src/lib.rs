//! WebSocket push infrastructure for live match updates.
//!
//! This crate owns every live connection and decides who receives which
//! score and odds frames.
//!
//! # Architecture
//!
//! - **Dual-index registry**: connections keyed by id, plus a topic index from
//!   match id to its subscribers, both in DashMaps. A connection holds at most
//!   one topic; `subscribe` vacates the old bucket before joining the new one
//!   and `remove` drops the bucket membership together with the connection.
//! - **Bounded outbound queues**: each connection has its own mpsc queue drained
//!   by a writer task in the web layer. A full queue is reported as a
//!   `DeliveryError` so the stream consumer can retry; a closed queue means the
//!   client is gone and the connection is pruned.
//! - **Heartbeat**: a timer sends `{"type":"ping"}` to every connection and
//!   removes the ones that cannot take it.
//!
//! # Message Flow
//!
//! 1. Client completes the `/ws` handshake; the web layer registers it here
//! 2. Client sends `{"type":"subscribe","data":"1001"}`; `session::dispatch`
//!    moves it onto topic `1001`
//! 3. The stream consumer decodes a record and calls `PushEventHandler::handle`
//! 4. `Manager::fanout` queues `{"type":"match_score","data":{...}}` for every
//!    subscriber of the record's match
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry with the topic index and client identity
//! - `manager`: High-level message routing (delegates to ConnectionRegistry)
//! - `message`: Outbound events, inbound client commands and replies
//! - `session`: Inbound frame dispatch
//! - `heartbeat`: Liveness sweeps
//! - `domain_event_handler`: `events::EventHandler` implementation used by every delivery path

pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod message;
pub mod session;

pub use domain_event_handler::PushEventHandler;
pub use manager::Manager;
