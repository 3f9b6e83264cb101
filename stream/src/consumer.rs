//! Consumer-group reader that turns stream records into fan-out.

use crate::dlq::{dlq_key, DlqStore, ParkOutcome, FALLBACK_KEY};
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::source::EventSource;
use events::{Delivery, EventHandler, StreamName, StreamRecord};
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Pause between empty non-blocking polls.
const IDLE_PAUSE: Duration = Duration::from_millis(100);

/// How one consumer reads its stream.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group: String,
    pub consumer: String,
    /// Physical key of the stream, used in log lines.
    pub stream_key: String,
    pub batch_size: usize,
    pub block: Duration,
    pub claim_min_idle: Duration,
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fanned out and acknowledged.
    Delivered(Delivery),
    /// Written to the DLQ under `key` and acknowledged.
    Parked { key: String },
    /// Could not be parked; left pending so another attempt can pick it up.
    Held,
}

/// One consumer-group member reading one logical stream.
///
/// Records are processed one at a time on the caller's task, retries included,
/// so a slow delivery holds back the records behind it.
pub struct StreamConsumer {
    stream: StreamName,
    source: Arc<dyn EventSource>,
    dlq: Arc<dyn DlqStore>,
    handler: Arc<dyn EventHandler>,
    retry: RetryPolicy,
    settings: ConsumerSettings,
}

impl StreamConsumer {
    pub fn new(
        stream: StreamName,
        source: Arc<dyn EventSource>,
        dlq: Arc<dyn DlqStore>,
        handler: Arc<dyn EventHandler>,
        retry: RetryPolicy,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            stream,
            source,
            dlq,
            handler,
            retry,
            settings,
        }
    }

    pub fn stream(&self) -> StreamName {
        self.stream
    }

    /// Join the consumer group, creating it if needed.
    pub async fn start(&self) -> Result<(), Error> {
        self.source.ensure_group(self.stream, &self.settings.group).await?;
        info!(
            "Consumer {} joined group {} on {}",
            self.settings.consumer, self.settings.group, self.settings.stream_key
        );
        Ok(())
    }

    /// Deliver one record, retrying and parking it on failure.
    pub async fn process(&self, mut record: StreamRecord) -> Outcome {
        let payload = match record.decode() {
            Ok(payload) => payload.clone(),
            Err(e) => {
                error!(
                    "Undecodable record {} on {}: {}",
                    record.id, self.settings.stream_key, e
                );
                return self.park_and_ack(&record, FALLBACK_KEY).await;
            }
        };
        let match_id = payload.match_id().to_string();

        let context = format!("Delivery of record {} for match {}", record.id, match_id);
        let handler = self.handler.as_ref();
        let payload = &payload;
        match self
            .retry
            .run(&context, move |_| handler.handle(payload))
            .await
        {
            Ok(delivery) => {
                self.ack(&record).await;
                Outcome::Delivered(delivery)
            }
            Err(e) => {
                error!(
                    "Delivery of record {} on {} for match {} failed after {} attempts: {}",
                    record.id,
                    self.settings.stream_key,
                    match_id,
                    self.retry.max_attempts(),
                    e
                );
                self.park_and_ack(&record, &dlq_key(&match_id)).await
            }
        }
    }

    async fn park_and_ack(&self, record: &StreamRecord, key: &str) -> Outcome {
        match self
            .dlq
            .park(key, record.stream, Some(record.id), &record.raw)
            .await
        {
            Ok(ParkOutcome::Parked(entry_id)) => {
                info!(
                    "Parked record {} from {} in {} as entry {}",
                    record.id, self.settings.stream_key, key, entry_id
                );
            }
            Ok(ParkOutcome::AlreadyParked(entry_id)) => {
                debug!(
                    "Record {} from {} already parked as entry {}",
                    record.id, self.settings.stream_key, entry_id
                );
            }
            Err(e) => {
                error!(
                    "Failed to park record {} from {} in {}: {}. Leaving it pending.",
                    record.id, self.settings.stream_key, key, e
                );
                return Outcome::Held;
            }
        }

        self.ack(record).await;
        Outcome::Parked {
            key: key.to_string(),
        }
    }

    async fn ack(&self, record: &StreamRecord) {
        if let Err(e) = self
            .source
            .ack(self.stream, &self.settings.group, record.id)
            .await
        {
            // Left pending: it will be claimed again and the DLQ dedupes a second park
            error!(
                "Failed to acknowledge record {} on {}: {}",
                record.id, self.settings.stream_key, e
            );
        }
    }

    /// Claim stale pending records (abandoned by other members or left pending
    /// here when parking failed), then read new ones, and process them all.
    /// Returns how many records were processed.
    pub async fn poll_once(&self) -> Result<usize, Error> {
        let mut records = self
            .source
            .claim_stale(
                self.stream,
                &self.settings.group,
                &self.settings.consumer,
                self.settings.claim_min_idle,
                self.settings.batch_size,
            )
            .await?;
        if !records.is_empty() {
            info!(
                "Claimed {} stale record(s) on {}",
                records.len(),
                self.settings.stream_key
            );
        }

        records.extend(
            self.source
                .read_group(
                    self.stream,
                    &self.settings.group,
                    &self.settings.consumer,
                    self.settings.batch_size,
                    self.settings.block,
                )
                .await?,
        );

        let processed = records.len();
        for record in records {
            trace!("Record {} from {}: {}", record.id, self.settings.stream_key, record.raw);
            self.process(record).await;
        }
        Ok(processed)
    }

    /// Poll until `shutdown` flips to true. Source errors are logged and polling
    /// resumes after a pause.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.start().await {
            error!("Consumer for {} could not join its group: {}", self.settings.stream_key, e);
        }

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                polled = self.poll_once() => match polled {
                    Ok(0) if self.settings.block.is_zero() => tokio::time::sleep(IDLE_PAUSE).await,
                    Ok(_) => {}
                    Err(e) => {
                        error!("Polling {} failed: {}", self.settings.stream_key, e);
                        tokio::time::sleep(self.settings.block.max(Duration::from_secs(1))).await;
                        // A lost group is recreated
                        if let Err(e) = self.start().await {
                            error!(
                                "Consumer for {} could not rejoin its group: {}",
                                self.settings.stream_key, e
                            );
                        }
                    }
                },
            }
        }
        info!("Consumer for {} stopped", self.settings.stream_key);
    }
}
