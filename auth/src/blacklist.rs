//! Revoked-token store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::Error;

const KEY_PREFIX: &str = "blacklist:token:";

/// Store of revoked tokens, consulted on every handshake.
///
/// Implementations backed by a remote store should return an error when the
/// store cannot be reached; the handshake treats that as a rejection.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Returns true if the token has been revoked and the entry has not expired.
    async fn is_blacklisted(&self, token: &str) -> Result<bool, Error>;

    /// Revoke a token for `ttl`. Re-inserting replaces the previous expiry.
    async fn insert(&self, token: &str, ttl: Duration) -> Result<(), Error>;
}

/// In-process blacklist. Entries expire lazily on lookup or via [`purge_expired`].
///
/// [`purge_expired`]: MemoryTokenBlacklist::purge_expired
#[derive(Debug, Default)]
pub struct MemoryTokenBlacklist {
    entries: DashMap<String, Instant>,
}

impl MemoryTokenBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(token: &str) -> String {
        format!("{KEY_PREFIX}{token}")
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries every `period` until `shutdown` flips to true.
    pub async fn run_purge(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.purge_expired();
                    if purged > 0 {
                        debug!("Purged {} expired token blacklist entries", purged);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Token blacklist purge stopped");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TokenBlacklist for MemoryTokenBlacklist {
    async fn is_blacklisted(&self, token: &str) -> Result<bool, Error> {
        let key = Self::key(token);
        let now = Instant::now();
        // remove_if keeps the expiry check and the removal under one shard lock
        if self
            .entries
            .remove_if(&key, |_, expires_at| *expires_at <= now)
            .is_some()
        {
            return Ok(false);
        }
        Ok(self.entries.contains_key(&key))
    }

    async fn insert(&self, token: &str, ttl: Duration) -> Result<(), Error> {
        self.entries.insert(Self::key(token), Instant::now() + ttl);
        Ok(())
    }
}
