//! Dead-letter queue for records that could not be delivered.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::{RecordId, StreamName};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DLQ_PREFIX: &str = "dlq_";
/// Bucket for payloads that could not be decoded, so no match id is known.
/// Shares its name with `dlq_key("unknown")`, so decodable entries in it are
/// still redelivered.
pub const FALLBACK_KEY: &str = "dlq_unknown";
/// Bucket for entries that exhausted their redrive budget. Outside the
/// `dlq_<matchId>` namespace so no match can collide with it.
pub const POISON_KEY: &str = "dlq:poison";

/// DLQ key for a match, `dlq_<matchId>`.
pub fn dlq_key(match_id: &str) -> String {
    format!("{DLQ_PREFIX}{match_id}")
}

/// True for buckets the reprocessor never redelivers.
pub fn is_terminal_key(key: &str) -> bool {
    key == POISON_KEY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqEntry {
    pub id: u64,
    pub key: String,
    pub stream: StreamName,
    /// Record the payload was read from, when it came from the upstream log.
    pub origin: Option<RecordId>,
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
    /// Redelivery attempts that failed since the entry was parked.
    pub failed_redrives: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    Parked(u64),
    /// The originating record was already in the DLQ; nothing was added.
    AlreadyParked(u64),
}

impl ParkOutcome {
    pub fn entry_id(&self) -> u64 {
        match self {
            ParkOutcome::Parked(id) | ParkOutcome::AlreadyParked(id) => *id,
        }
    }
}

/// Store for parked payloads, grouped under `dlq_*` keys.
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Park a payload under `key`. A record identified by `(stream, origin)` is
    /// stored at most once across all keys.
    async fn park(
        &self,
        key: &str,
        stream: StreamName,
        origin: Option<RecordId>,
        payload: &str,
    ) -> Result<ParkOutcome, Error>;

    /// Every key holding at least one entry.
    async fn keys(&self) -> Result<Vec<String>, Error>;

    /// All entries under `key`, oldest first.
    async fn entries(&self, key: &str) -> Result<Vec<DlqEntry>, Error>;

    /// Remove one entry. Returns false if it was not there.
    async fn remove(&self, key: &str, id: u64) -> Result<bool, Error>;

    /// Count a failed redelivery, returning the new total.
    async fn record_failure(&self, key: &str, id: u64) -> Result<u32, Error>;

    /// Move an entry to another key, keeping its id and origin.
    async fn move_to(&self, key: &str, id: u64, target: &str) -> Result<bool, Error>;
}

/// In-process DLQ store.
#[derive(Debug, Default)]
pub struct MemoryDlqStore {
    buckets: DashMap<String, Vec<DlqEntry>>,
    origins: DashMap<(StreamName, RecordId), u64>,
    next_id: AtomicU64,
}

impl MemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all keys.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, key: &str, id: u64) -> Option<DlqEntry> {
        match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut bucket) => {
                let position = bucket.get().iter().position(|entry| entry.id == id)?;
                let entry = bucket.get_mut().remove(position);
                if bucket.get().is_empty() {
                    bucket.remove();
                }
                Some(entry)
            }
            Entry::Vacant(_) => None,
        }
    }
}

#[async_trait]
impl DlqStore for MemoryDlqStore {
    async fn park(
        &self,
        key: &str,
        stream: StreamName,
        origin: Option<RecordId>,
        payload: &str,
    ) -> Result<ParkOutcome, Error> {
        let mut entry = DlqEntry {
            id: 0,
            key: key.to_string(),
            stream,
            origin,
            payload: payload.to_string(),
            enqueued_at: Utc::now(),
            failed_redrives: 0,
        };

        let Some(record_id) = origin else {
            entry.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let id = entry.id;
            self.buckets.entry(key.to_string()).or_default().push(entry);
            return Ok(ParkOutcome::Parked(id));
        };

        // The origin entry stays locked until the bucket holds the payload
        match self.origins.entry((stream, record_id)) {
            Entry::Occupied(existing) => Ok(ParkOutcome::AlreadyParked(*existing.get())),
            Entry::Vacant(slot) => {
                entry.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                let id = entry.id;
                self.buckets.entry(key.to_string()).or_default().push(entry);
                slot.insert(id);
                Ok(ParkOutcome::Parked(id))
            }
        }
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        let mut keys: Vec<String> = self
            .buckets
            .iter()
            .filter(|bucket| bucket.key().starts_with(DLQ_PREFIX) && !bucket.value().is_empty())
            .map(|bucket| bucket.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn entries(&self, key: &str) -> Result<Vec<DlqEntry>, Error> {
        Ok(self
            .buckets
            .get(key)
            .map(|bucket| bucket.clone())
            .unwrap_or_default())
    }

    async fn remove(&self, key: &str, id: u64) -> Result<bool, Error> {
        match self.take(key, id) {
            Some(entry) => {
                if let Some(origin) = entry.origin {
                    self.origins.remove(&(entry.stream, origin));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failure(&self, key: &str, id: u64) -> Result<u32, Error> {
        let failures = self.buckets.get_mut(key).and_then(|mut bucket| {
            bucket.iter_mut().find(|entry| entry.id == id).map(|entry| {
                entry.failed_redrives += 1;
                entry.failed_redrives
            })
        });
        Ok(failures.unwrap_or(0))
    }

    async fn move_to(&self, key: &str, id: u64, target: &str) -> Result<bool, Error> {
        match self.take(key, id) {
            Some(mut entry) => {
                entry.key = target.to_string();
                self.buckets.entry(target.to_string()).or_default().push(entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
