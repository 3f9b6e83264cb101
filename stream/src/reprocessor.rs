//! Periodic redelivery of parked records.

use crate::dlq::{is_terminal_key, DlqEntry, DlqStore, FALLBACK_KEY, POISON_KEY};
use crate::error::Error;
use events::{EventHandler, StreamPayload};
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Counts from one DLQ sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub redelivered: usize,
    pub failed: usize,
    /// Entries moved to the poison bucket after reaching the redrive cap.
    pub poisoned: usize,
    /// Keys that could not be read or written.
    pub key_errors: usize,
}

pub struct DlqReprocessor {
    dlq: Arc<dyn DlqStore>,
    handler: Arc<dyn EventHandler>,
    max_redrives: Option<u32>,
}

impl DlqReprocessor {
    /// `max_redrives` of `None` keeps retrying an entry on every sweep.
    pub fn new(dlq: Arc<dyn DlqStore>, handler: Arc<dyn EventHandler>, max_redrives: Option<u32>) -> Self {
        Self {
            dlq,
            handler,
            max_redrives,
        }
    }

    /// Try every entry under every redeliverable key once.
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();

        for key in self.dlq.keys().await? {
            if is_terminal_key(&key) {
                continue;
            }
            if let Err(e) = self.sweep_key(&key, &mut report).await {
                error!("DLQ sweep of {} failed: {}", key, e);
                report.key_errors += 1;
            }
        }

        if report != SweepReport::default() {
            info!(
                "DLQ sweep: {} redelivered, {} failed, {} poisoned, {} key error(s)",
                report.redelivered, report.failed, report.poisoned, report.key_errors
            );
        }
        Ok(report)
    }

    async fn sweep_key(&self, key: &str, report: &mut SweepReport) -> Result<(), Error> {
        for entry in self.dlq.entries(key).await? {
            let payload = match StreamPayload::decode(entry.stream, &entry.payload) {
                Ok(payload) => payload,
                Err(_) if key == FALLBACK_KEY => {
                    trace!("Leaving undecodable DLQ entry {} in {}", entry.id, key);
                    continue;
                }
                Err(e) => {
                    warn!("DLQ entry {} in {} no longer decodes: {}", entry.id, key, e);
                    self.dlq.move_to(key, entry.id, FALLBACK_KEY).await?;
                    continue;
                }
            };

            match self.handler.handle(&payload).await {
                Ok(delivery) => {
                    self.dlq.remove(key, entry.id).await?;
                    report.redelivered += 1;
                    info!(
                        "Redelivered DLQ entry {} from {} to {} connection(s)",
                        entry.id, key, delivery.delivered
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Redelivery of DLQ entry {} from {} failed: {}", entry.id, key, e);
                    self.count_failure(key, &entry, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn count_failure(&self, key: &str, entry: &DlqEntry, report: &mut SweepReport) -> Result<(), Error> {
        let Some(max_redrives) = self.max_redrives else {
            return Ok(());
        };
        let failures = self.dlq.record_failure(key, entry.id).await?;
        if failures >= max_redrives {
            self.dlq.move_to(key, entry.id, POISON_KEY).await?;
            report.poisoned += 1;
            error!(
                "DLQ entry {} from {} moved to {} after {} failed redeliveries",
                entry.id, key, POISON_KEY, failures
            );
        }
        Ok(())
    }

    /// Sweep every `period` until `shutdown` flips to true.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("DLQ sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("DLQ reprocessor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::tests::{FlakyHandler, SCORE_JSON};
    use crate::dlq::{dlq_key, MemoryDlqStore};
    use events::{RecordId, StreamName};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_successful_sweep_removes_only_redelivered_entry() {
        let dlq = Arc::new(MemoryDlqStore::new());
        let other_payload = SCORE_JSON.replace("\"minute\":10", "\"minute\":11");
        dlq.park("dlq_1001", StreamName::Match, Some(RecordId(1)), SCORE_JSON)
            .await
            .unwrap();
        dlq.park("dlq_1001", StreamName::Match, Some(RecordId(2)), &other_payload)
            .await
            .unwrap();
        let flaky = DlqReprocessor::new(dlq.clone(), Arc::new(OnceThenFail::default()), None);

        let report = flaky.sweep().await.unwrap();

        assert_eq!(report.redelivered, 1);
        assert_eq!(report.failed, 1);
        let left = dlq.entries("dlq_1001").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload, other_payload);

        let handler = Arc::new(FlakyHandler::new(0));
        let reprocessor = DlqReprocessor::new(dlq.clone(), handler.clone(), None);
        let report = reprocessor.sweep().await.unwrap();
        assert_eq!(report.redelivered, 1);
        assert!(dlq.is_empty());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_entries_stay_without_cap() {
        let dlq = Arc::new(MemoryDlqStore::new());
        dlq.park("dlq_1001", StreamName::Match, Some(RecordId(1)), SCORE_JSON)
            .await
            .unwrap();
        let reprocessor = DlqReprocessor::new(dlq.clone(), Arc::new(FlakyHandler::always_failing()), None);

        for _ in 0..5 {
            assert_eq!(reprocessor.sweep().await.unwrap().failed, 1);
        }

        assert_eq!(dlq.entries("dlq_1001").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redrive_cap_moves_entry_to_poison() {
        let dlq = Arc::new(MemoryDlqStore::new());
        dlq.park("dlq_1001", StreamName::Match, Some(RecordId(1)), SCORE_JSON)
            .await
            .unwrap();
        let handler = Arc::new(FlakyHandler::always_failing());
        let reprocessor = DlqReprocessor::new(dlq.clone(), handler.clone(), Some(2));

        assert_eq!(reprocessor.sweep().await.unwrap().poisoned, 0);
        assert_eq!(reprocessor.sweep().await.unwrap().poisoned, 1);
        reprocessor.sweep().await.unwrap();

        assert!(dlq.entries("dlq_1001").await.unwrap().is_empty());
        assert_eq!(dlq.entries(POISON_KEY).await.unwrap().len(), 1);
        // The poison bucket is never redelivered
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_bucket_is_not_redelivered() {
        let dlq = Arc::new(MemoryDlqStore::new());
        dlq.park(FALLBACK_KEY, StreamName::Match, Some(RecordId(1)), "{bad")
            .await
            .unwrap();
        let handler = Arc::new(FlakyHandler::new(0));
        let reprocessor = DlqReprocessor::new(dlq.clone(), handler.clone(), None);

        let report = reprocessor.sweep().await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert_eq!(dlq.entries(FALLBACK_KEY).await.unwrap().len(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_poison_named_match_is_redelivered() {
        let dlq = Arc::new(MemoryDlqStore::new());
        let poison_match = SCORE_JSON.replace("1001", "poison");
        let unknown_match = SCORE_JSON.replace("1001", "unknown");
        dlq.park(&dlq_key("poison"), StreamName::Match, Some(RecordId(1)), &poison_match)
            .await
            .unwrap();
        dlq.park(&dlq_key("unknown"), StreamName::Match, Some(RecordId(2)), &unknown_match)
            .await
            .unwrap();
        let handler = Arc::new(FlakyHandler::new(0));
        let reprocessor = DlqReprocessor::new(dlq.clone(), handler.clone(), None);

        let report = reprocessor.sweep().await.unwrap();

        assert_eq!(report.redelivered, 2);
        assert!(dlq.is_empty());
        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["poison".to_string(), "unknown".to_string()]);
    }

    /// Succeeds on the first call only.
    #[derive(Default)]
    struct OnceThenFail {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventHandler for OnceThenFail {
        async fn handle(&self, payload: &StreamPayload) -> Result<events::Delivery, events::DeliveryError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(events::Delivery {
                    delivered: 1,
                    pruned: 0,
                })
            } else {
                Err(events::DeliveryError {
                    topic: payload.match_id().to_string(),
                    kind: events::DeliveryErrorKind::Unavailable("down".to_string()),
                })
            }
        }
    }
}
