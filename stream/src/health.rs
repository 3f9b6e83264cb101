//! Periodic report on consumer-group members.

use crate::error::Error;
use crate::source::{ConsumerInfo, EventSource};
use events::StreamName;
use log::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_IDLE_WARN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
pub struct StreamHealth {
    pub stream: StreamName,
    pub key: String,
    pub consumers: Vec<ConsumerInfo>,
    /// Members idle for longer than the warning threshold.
    pub idle: Vec<String>,
}

#[derive(Clone)]
pub struct ConsumerGroupHealthCheck {
    source: Arc<dyn EventSource>,
    group: String,
    /// Logical stream and its physical key.
    streams: Vec<(StreamName, String)>,
    idle_warn: Duration,
}

impl ConsumerGroupHealthCheck {
    pub fn new(
        source: Arc<dyn EventSource>,
        group: impl Into<String>,
        streams: Vec<(StreamName, String)>,
        idle_warn: Duration,
    ) -> Self {
        Self {
            source,
            group: group.into(),
            streams,
            idle_warn,
        }
    }

    pub async fn check(&self) -> Result<Vec<StreamHealth>, Error> {
        let idle_warn_ms = u64::try_from(self.idle_warn.as_millis()).unwrap_or(u64::MAX);
        let mut reports = Vec::with_capacity(self.streams.len());

        for (stream, key) in &self.streams {
            let consumers = self.source.group_info(*stream, &self.group).await?;
            let mut idle = Vec::new();
            for consumer in &consumers {
                info!(
                    "Stream {} group {} consumer {}: {} pending, idle {} ms",
                    key, self.group, consumer.name, consumer.pending, consumer.idle_ms
                );
                if consumer.idle_ms > idle_warn_ms {
                    warn!(
                        "Consumer {} on {} idle for {} ms with {} pending record(s)",
                        consumer.name, key, consumer.idle_ms, consumer.pending
                    );
                    idle.push(consumer.name.clone());
                }
            }
            reports.push(StreamHealth {
                stream: *stream,
                key: key.clone(),
                consumers,
                idle,
            });
        }
        Ok(reports)
    }

    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check().await {
                        error!("Consumer group health check failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Consumer group health check stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryEventLog;

    const GROUP: &str = "sports-push-consumer-group";

    fn streams() -> Vec<(StreamName, String)> {
        vec![
            (StreamName::Match, "match_stream".to_string()),
            (StreamName::Odds, "odds_stream".to_string()),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_flags_members_idle_past_threshold() {
        let log = Arc::new(MemoryEventLog::new());
        for stream in StreamName::ALL {
            log.ensure_group(stream, GROUP).await.unwrap();
        }
        log.append(StreamName::Match, "{}".to_string()).await.unwrap();
        log.read_group(StreamName::Match, GROUP, "push-a", 10, Duration::ZERO)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        log.read_group(StreamName::Match, GROUP, "push-b", 10, Duration::ZERO)
            .await
            .unwrap();

        let check = ConsumerGroupHealthCheck::new(log, GROUP, streams(), DEFAULT_IDLE_WARN);
        let reports = check.check().await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].consumers.len(), 2);
        assert_eq!(reports[0].idle, vec!["push-a".to_string()]);
        assert!(reports[1].consumers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_group_is_an_error() {
        let log = Arc::new(MemoryEventLog::new());
        let check = ConsumerGroupHealthCheck::new(log, GROUP, streams(), DEFAULT_IDLE_WARN);

        assert!(check.check().await.is_err());
    }
}
