//! Transport-free reconnect state machine.
//!
//! `Connecting -> Open -> Closed -> ReconnectScheduled -> Connecting`, ending
//! in `Failed` after too many consecutive failures. The driver in
//! [`crate::client`] feeds it transport events and acts on what it returns.

use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

pub const MAX_RETRY: u32 = 5;
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Open,
    Closed,
    ReconnectScheduled { delay: Duration },
    /// No further attempts will be made.
    Failed,
}

pub fn subscribe_frame(match_id: &str) -> String {
    json!({"type": "subscribe", "data": match_id}).to_string()
}

pub fn unsubscribe_frame(match_id: &str) -> String {
    json!({"type": "unsubscribe", "data": match_id}).to_string()
}

#[derive(Debug, Clone)]
pub struct Reconnector {
    state: ClientState,
    retry_count: u32,
    base_interval: Duration,
    max_retries: u32,
    subscriptions: BTreeSet<String>,
}

impl Reconnector {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            state: ClientState::Connecting,
            retry_count: 0,
            base_interval,
            max_retries: MAX_RETRY,
            subscriptions: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    pub fn is_open(&self) -> bool {
        self.state == ClientState::Open
    }

    /// `min(base * 2^retry_count, 60s)`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base_interval.checked_mul(factor))
            .map_or(MAX_RECONNECT_DELAY, |delay| delay.min(MAX_RECONNECT_DELAY))
    }

    /// The transport is up. Returns the subscribe frames to replay, one per
    /// remembered match.
    pub fn on_open(&mut self) -> Vec<String> {
        self.state = ClientState::Open;
        self.retry_count = 0;
        self.subscriptions.iter().map(|id| subscribe_frame(id)).collect()
    }

    /// The transport closed or failed to open. Returns the delay before the
    /// next attempt, or `None` once the retry budget is spent.
    pub fn on_closed(&mut self) -> Option<Duration> {
        if self.state == ClientState::Failed {
            return None;
        }
        self.state = ClientState::Closed;

        if self.retry_count >= self.max_retries {
            self.state = ClientState::Failed;
            return None;
        }
        let delay = self.delay_for(self.retry_count);
        self.retry_count += 1;
        self.state = ClientState::ReconnectScheduled { delay };
        Some(delay)
    }

    /// The scheduled delay elapsed; a new attempt starts.
    pub fn on_reconnect_due(&mut self) {
        if matches!(self.state, ClientState::ReconnectScheduled { .. }) {
            self.state = ClientState::Connecting;
        }
    }

    /// Remember `match_id`. Returns the frame to send now if the transport is open.
    pub fn subscribe(&mut self, match_id: &str) -> Option<String> {
        self.subscriptions.insert(match_id.to_string());
        self.is_open().then(|| subscribe_frame(match_id))
    }

    /// Forget `match_id`. Returns the frame to send now if the transport is open.
    pub fn unsubscribe(&mut self, match_id: &str) -> Option<String> {
        self.subscriptions.remove(match_id);
        self.is_open().then(|| unsubscribe_frame(match_id))
    }
}

impl Default for Reconnector {
    fn default() -> Self {
        Self::new(RECONNECT_INTERVAL)
    }
}
