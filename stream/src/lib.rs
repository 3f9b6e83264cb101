//! Upstream side of the push service.
//!
//! Records are read from an [`source::EventSource`] as a consumer-group member,
//! decoded and handed to an [`events::EventHandler`] for fan-out. Deliveries
//! that keep failing after the [`retry::RetryPolicy`] is spent are parked in the
//! dead-letter queue ([`dlq`]) and retried later by the
//! [`reprocessor::DlqReprocessor`]. Scheduled pushes go through
//! [`delayed::DelayedDispatcher`], which shares the same fan-out path.
//!
//! Every long-running task here exposes `run(.., shutdown)` and stops when the
//! `watch` channel flips to `true`.

pub mod consumer;
pub mod delayed;
pub mod dlq;
pub mod error;
pub mod health;
pub mod replay;
pub mod reprocessor;
pub mod retry;
pub mod source;

pub use consumer::{ConsumerSettings, Outcome, StreamConsumer};
pub use delayed::{DelayedDispatcher, DelayedStore, MemoryDelayedStore};
pub use dlq::{DlqStore, MemoryDlqStore};
pub use error::Error;
pub use health::ConsumerGroupHealthCheck;
pub use reprocessor::DlqReprocessor;
pub use retry::RetryPolicy;
pub use source::{EventSource, MemoryEventLog};
