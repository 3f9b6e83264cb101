//! Scheduled pushes: records held until a due time, then fanned out.

use crate::dlq::{DlqStore, FALLBACK_KEY};
use crate::error::Error;
use async_trait::async_trait;
use chrono::Utc;
use events::{EventHandler, StreamName, StreamPayload};
use log::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_DELAYED_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelayedEntry {
    pub id: u64,
    /// Milliseconds since the epoch at which the entry becomes deliverable.
    pub due_at_millis: i64,
    pub stream: StreamName,
    pub payload: String,
}

/// Time-ordered store of scheduled payloads.
#[async_trait]
pub trait DelayedStore: Send + Sync {
    async fn schedule(&self, due_at_millis: i64, stream: StreamName, payload: &str) -> Result<DelayedEntry, Error>;

    /// Entries due at or before `now_millis`, earliest first.
    async fn due(&self, now_millis: i64) -> Result<Vec<DelayedEntry>, Error>;

    async fn remove(&self, entry: &DelayedEntry) -> Result<bool, Error>;
}

/// In-process delayed store ordered by `(due_at_millis, id)`.
#[derive(Debug, Default)]
pub struct MemoryDelayedStore {
    entries: Mutex<BTreeMap<(i64, u64), DelayedEntry>>,
    next_id: AtomicU64,
}

impl MemoryDelayedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl DelayedStore for MemoryDelayedStore {
    async fn schedule(&self, due_at_millis: i64, stream: StreamName, payload: &str) -> Result<DelayedEntry, Error> {
        let entry = DelayedEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            due_at_millis,
            stream,
            payload: payload.to_string(),
        };
        self.entries
            .lock()
            .await
            .insert((due_at_millis, entry.id), entry.clone());
        Ok(entry)
    }

    async fn due(&self, now_millis: i64) -> Result<Vec<DelayedEntry>, Error> {
        Ok(self
            .entries
            .lock()
            .await
            .range(..=(now_millis, u64::MAX))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn remove(&self, entry: &DelayedEntry) -> Result<bool, Error> {
        Ok(self
            .entries
            .lock()
            .await
            .remove(&(entry.due_at_millis, entry.id))
            .is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// Entries that did not decode and were parked in the fallback DLQ bucket.
    pub parked: usize,
}

/// Delivers due entries through the shared fan-out path.
pub struct DelayedDispatcher {
    store: Arc<dyn DelayedStore>,
    dlq: Arc<dyn DlqStore>,
    handler: Arc<dyn EventHandler>,
}

impl DelayedDispatcher {
    pub fn new(store: Arc<dyn DelayedStore>, dlq: Arc<dyn DlqStore>, handler: Arc<dyn EventHandler>) -> Self {
        Self { store, dlq, handler }
    }

    pub async fn sweep(&self) -> Result<DispatchReport, Error> {
        self.sweep_at(Utc::now().timestamp_millis()).await
    }

    /// Deliver everything due at `now_millis`. Failed deliveries stay scheduled.
    pub async fn sweep_at(&self, now_millis: i64) -> Result<DispatchReport, Error> {
        let mut report = DispatchReport::default();

        for entry in self.store.due(now_millis).await? {
            let payload = match StreamPayload::decode(entry.stream, &entry.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Delayed entry {} on {} does not decode: {}", entry.id, entry.stream, e);
                    self.dlq.park(FALLBACK_KEY, entry.stream, None, &entry.payload).await?;
                    self.store.remove(&entry).await?;
                    report.parked += 1;
                    continue;
                }
            };

            match self.handler.handle(&payload).await {
                Ok(delivery) => {
                    self.store.remove(&entry).await?;
                    report.delivered += 1;
                    debug!(
                        "Delayed entry {} for match {} delivered to {} connection(s)",
                        entry.id,
                        payload.match_id(),
                        delivery.delivered
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "Delayed entry {} for match {} failed, keeping it for the next sweep: {}",
                        entry.id,
                        payload.match_id(),
                        e
                    );
                }
            }
        }
        Ok(report)
    }

    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report != DispatchReport::default() => info!(
                            "Delayed sweep: {} delivered, {} failed, {} parked",
                            report.delivered, report.failed, report.parked
                        ),
                        Ok(_) => {}
                        Err(e) => error!("Delayed sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Delayed dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::tests::{FlakyHandler, SCORE_JSON};
    use crate::dlq::MemoryDlqStore;
    use std::sync::atomic::Ordering;

    struct Fixture {
        store: Arc<MemoryDelayedStore>,
        dlq: Arc<MemoryDlqStore>,
        handler: Arc<FlakyHandler>,
        dispatcher: DelayedDispatcher,
    }

    fn fixture(handler: FlakyHandler) -> Fixture {
        let store = Arc::new(MemoryDelayedStore::new());
        let dlq = Arc::new(MemoryDlqStore::new());
        let handler = Arc::new(handler);
        let dispatcher = DelayedDispatcher::new(store.clone(), dlq.clone(), handler.clone());
        Fixture {
            store,
            dlq,
            handler,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_due_returns_entries_in_time_order() {
        let store = MemoryDelayedStore::new();
        store.schedule(300, StreamName::Match, "c").await.unwrap();
        store.schedule(100, StreamName::Match, "a").await.unwrap();
        store.schedule(200, StreamName::Odds, "b").await.unwrap();

        let due: Vec<String> = store
            .due(200)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.payload)
            .collect();

        assert_eq!(due, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_only_due_entries_are_delivered() {
        let f = fixture(FlakyHandler::new(0));
        f.store.schedule(1_000, StreamName::Match, SCORE_JSON).await.unwrap();
        f.store.schedule(5_000, StreamName::Match, SCORE_JSON).await.unwrap();

        let report = f.dispatcher.sweep_at(2_000).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(f.store.len().await, 1);
        assert_eq!(*f.handler.seen.lock().unwrap(), vec!["1001".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_delivery_stays_scheduled() {
        let f = fixture(FlakyHandler::new(1));
        f.store.schedule(1_000, StreamName::Match, SCORE_JSON).await.unwrap();

        assert_eq!(f.dispatcher.sweep_at(2_000).await.unwrap().failed, 1);
        assert_eq!(f.store.len().await, 1);

        assert_eq!(f.dispatcher.sweep_at(62_000).await.unwrap().delivered, 1);
        assert_eq!(f.store.len().await, 0);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_entry_moves_to_fallback_bucket() {
        let f = fixture(FlakyHandler::new(0));
        f.store.schedule(1_000, StreamName::Odds, "{oops").await.unwrap();

        let report = f.dispatcher.sweep_at(1_000).await.unwrap();

        assert_eq!(report.parked, 1);
        assert_eq!(f.store.len().await, 0);
        assert_eq!(f.dlq.entries(FALLBACK_KEY).await.unwrap()[0].payload, "{oops");
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 0);
    }
}
