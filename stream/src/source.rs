//! Upstream event log seam and its in-process implementation.

use crate::error::{source_error, Error, SourceErrorKind};
use async_trait::async_trait;
use dashmap::DashMap;
use events::{RecordId, StreamName, StreamRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// State of one member of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerInfo {
    pub name: String,
    /// Records delivered to this member and not yet acknowledged.
    pub pending: usize,
    /// Milliseconds since the member last read or claimed.
    pub idle_ms: u64,
}

/// Ordered, replicated log read under consumer-group semantics.
///
/// Each record is delivered to exactly one member of a group. A delivered record
/// stays pending until acknowledged; pending records idle long enough can be
/// claimed by another member.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Create the group if it does not exist. Idempotent.
    async fn ensure_group(&self, stream: StreamName, group: &str) -> Result<(), Error>;

    /// Read up to `count` never-delivered records for `consumer`, waiting up to
    /// `block` for at least one.
    async fn read_group(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, Error>;

    /// Acknowledge a record. Returns false if it was not pending.
    async fn ack(&self, stream: StreamName, group: &str, id: RecordId) -> Result<bool, Error>;

    /// Take over up to `count` records pending for at least `min_idle` on any
    /// member, `consumer` included, so records it left pending are retried.
    async fn claim_stale(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamRecord>, Error>;

    async fn group_info(&self, stream: StreamName, group: &str) -> Result<Vec<ConsumerInfo>, Error>;

    /// The last `count` records of the stream, oldest first.
    async fn recent(&self, stream: StreamName, count: usize) -> Result<Vec<StreamRecord>, Error>;

    async fn append(&self, stream: StreamName, raw: String) -> Result<RecordId, Error>;
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest record id handed out to any member.
    last_delivered: u64,
    pending: BTreeMap<RecordId, PendingEntry>,
    last_seen: HashMap<String, Instant>,
}

#[derive(Debug, Default)]
struct StreamLog {
    /// Record `n` lives at index `n - 1`.
    entries: Vec<String>,
    groups: HashMap<String, GroupState>,
}

impl StreamLog {
    fn record(&self, stream: StreamName, id: RecordId) -> Option<StreamRecord> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.entries
            .get(index)
            .map(|raw| StreamRecord::new(stream, id, raw.clone()))
    }
}

fn no_group(stream: StreamName, group: &str) -> Error {
    source_error(
        SourceErrorKind::NoGroup,
        &format!("Consumer group {group} does not exist on stream {stream}"),
    )
}

/// In-process event log with consumer groups, pending lists and claiming.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    streams: DashMap<StreamName, StreamLog>,
    appended: Notify,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, stream: StreamName) -> usize {
        self.streams.get(&stream).map(|log| log.entries.len()).unwrap_or(0)
    }

    fn try_read(&self, stream: StreamName, group: &str, consumer: &str, count: usize) -> Result<Vec<StreamRecord>, Error> {
        let mut guard = self.streams.entry(stream).or_default();
        let StreamLog { entries, groups } = &mut *guard;
        let state = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;
        let now = Instant::now();
        state.last_seen.insert(consumer.to_string(), now);

        let start = usize::try_from(state.last_delivered).unwrap_or(usize::MAX);
        let records: Vec<StreamRecord> = entries
            .iter()
            .enumerate()
            .skip(start)
            .take(count)
            .map(|(index, raw)| StreamRecord::new(stream, RecordId(index as u64 + 1), raw.clone()))
            .collect();

        for record in &records {
            state.pending.insert(
                record.id,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                },
            );
        }
        if let Some(last) = records.last() {
            state.last_delivered = last.id.0;
        }
        Ok(records)
    }
}

#[async_trait]
impl EventSource for MemoryEventLog {
    async fn ensure_group(&self, stream: StreamName, group: &str) -> Result<(), Error> {
        self.streams
            .entry(stream)
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, Error> {
        let deadline = Instant::now() + block;
        loop {
            // Registered before reading so an append in between still wakes us
            let appended = self.appended.notified();
            let records = self.try_read(stream, group, consumer, count)?;
            if !records.is_empty() || block.is_zero() {
                return Ok(records);
            }
            if timeout_at(deadline, appended).await.is_err() {
                return self.try_read(stream, group, consumer, count);
            }
        }
    }

    async fn ack(&self, stream: StreamName, group: &str, id: RecordId) -> Result<bool, Error> {
        let mut log = self.streams.get_mut(&stream).ok_or_else(|| no_group(stream, group))?;
        let state = log.groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;
        Ok(state.pending.remove(&id).is_some())
    }

    async fn claim_stale(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamRecord>, Error> {
        let mut guard = self.streams.get_mut(&stream).ok_or_else(|| no_group(stream, group))?;
        let log = &mut *guard;
        let state = log.groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;
        let now = Instant::now();
        state.last_seen.insert(consumer.to_string(), now);

        let mut claimed = Vec::new();
        for (id, entry) in state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(entry.delivered_at) >= min_idle {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                claimed.push(*id);
            }
        }

        Ok(claimed
            .into_iter()
            .filter_map(|id| log.record(stream, id))
            .collect())
    }

    async fn group_info(&self, stream: StreamName, group: &str) -> Result<Vec<ConsumerInfo>, Error> {
        let log = self.streams.get(&stream).ok_or_else(|| no_group(stream, group))?;
        let state = log.groups.get(group).ok_or_else(|| no_group(stream, group))?;
        let now = Instant::now();

        let mut consumers: Vec<ConsumerInfo> = state
            .last_seen
            .iter()
            .map(|(name, seen)| ConsumerInfo {
                name: name.clone(),
                pending: state
                    .pending
                    .values()
                    .filter(|entry| &entry.consumer == name)
                    .count(),
                idle_ms: now.duration_since(*seen).as_millis() as u64,
            })
            .collect();
        consumers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(consumers)
    }

    async fn recent(&self, stream: StreamName, count: usize) -> Result<Vec<StreamRecord>, Error> {
        let Some(log) = self.streams.get(&stream) else {
            return Ok(Vec::new());
        };
        let start = log.entries.len().saturating_sub(count);
        Ok(log.entries[start..]
            .iter()
            .enumerate()
            .map(|(offset, raw)| StreamRecord::new(stream, RecordId((start + offset) as u64 + 1), raw.clone()))
            .collect())
    }

    async fn append(&self, stream: StreamName, raw: String) -> Result<RecordId, Error> {
        let id = {
            let mut log = self.streams.entry(stream).or_default();
            log.entries.push(raw);
            RecordId(log.entries.len() as u64)
        };
        self.appended.notify_waiters();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;

    const GROUP: &str = "sports-push-consumer-group";

    async fn log_with(records: &[&str]) -> MemoryEventLog {
        let log = MemoryEventLog::new();
        log.ensure_group(StreamName::Match, GROUP).await.unwrap();
        for raw in records {
            log.append(StreamName::Match, raw.to_string()).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn test_each_record_goes_to_one_group_member() {
        let log = log_with(&["a", "b", "c"]).await;

        let first = log
            .read_group(StreamName::Match, GROUP, "one", 2, Duration::ZERO)
            .await
            .unwrap();
        let second = log
            .read_group(StreamName::Match, GROUP, "two", 10, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(first.iter().map(|r| r.raw.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(second.iter().map(|r| r.raw.as_str()).collect::<Vec<_>>(), ["c"]);
        assert_eq!(second[0].id, RecordId(3));
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let log = MemoryEventLog::new();

        let err = log
            .read_group(StreamName::Odds, GROUP, "one", 1, Duration::ZERO)
            .await
            .unwrap_err();

        assert_eq!(err.error_kind, ErrorKind::Source(SourceErrorKind::NoGroup));
    }

    #[tokio::test]
    async fn test_ack_clears_pending() {
        let log = log_with(&["a"]).await;
        let records = log
            .read_group(StreamName::Match, GROUP, "one", 1, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(log.group_info(StreamName::Match, GROUP).await.unwrap()[0].pending, 1);
        assert!(log.ack(StreamName::Match, GROUP, records[0].id).await.unwrap());
        assert!(!log.ack(StreamName::Match, GROUP, records[0].id).await.unwrap());
        assert_eq!(log.group_info(StreamName::Match, GROUP).await.unwrap()[0].pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pending_record_is_claimed_by_another_member() {
        let log = log_with(&["a"]).await;
        log.read_group(StreamName::Match, GROUP, "crashed", 1, Duration::ZERO)
            .await
            .unwrap();

        let too_early = log
            .claim_stale(StreamName::Match, GROUP, "healthy", Duration::from_secs(60), 10)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let claimed = log
            .claim_stale(StreamName::Match, GROUP, "healthy", Duration::from_secs(60), 10)
            .await
            .unwrap();

        assert!(too_early.is_empty());
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].raw, "a");
        let info = log.group_info(StreamName::Match, GROUP).await.unwrap();
        let healthy = info.iter().find(|c| c.name == "healthy").unwrap();
        assert_eq!(healthy.pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_reclaims_its_own_stale_record() {
        let log = log_with(&["a"]).await;
        log.read_group(StreamName::Match, GROUP, "only", 1, Duration::ZERO)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let claimed = log
            .claim_stale(StreamName::Match, GROUP, "only", Duration::from_secs(60), 10)
            .await
            .unwrap();
        let again = log
            .claim_stale(StreamName::Match, GROUP, "only", Duration::from_secs(60), 10)
            .await
            .unwrap();

        assert_eq!(claimed.len(), 1);
        // Claiming restarts the idle clock
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let log = Arc::new(log_with(&[]).await);
        let reader = {
            let log = log.clone();
            tokio::spawn(async move {
                log.read_group(StreamName::Match, GROUP, "one", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::task::yield_now().await;
        log.append(StreamName::Match, "late".to_string()).await.unwrap();

        let records = reader.await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_times_out_empty() {
        let log = log_with(&[]).await;

        let records = log
            .read_group(StreamName::Match, GROUP, "one", 10, Duration::from_millis(2000))
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_recent_returns_tail_oldest_first() {
        let log = log_with(&["a", "b", "c"]).await;

        let recent = log.recent(StreamName::Match, 2).await.unwrap();

        assert_eq!(recent.iter().map(|r| r.raw.as_str()).collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(recent[0].id, RecordId(2));
        assert!(log.recent(StreamName::Odds, 5).await.unwrap().is_empty());
    }
}
