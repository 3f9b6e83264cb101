//! Stream replay and publish response DTOs

use events::{Delivery, RecordId, StreamName, StreamRecord};
use serde::Serialize;
use serde_json::Value;

/// One record read back from the upstream log, body embedded as JSON
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReplayedRecord {
    pub(crate) id: RecordId,
    pub(crate) stream: StreamName,
    pub(crate) payload: Value,
}

impl From<StreamRecord> for ReplayedRecord {
    fn from(record: StreamRecord) -> Self {
        // Replay only returns records that decoded, so the body is JSON
        let payload = serde_json::from_str(&record.raw).unwrap_or(Value::String(record.raw));
        Self {
            id: record.id,
            stream: record.stream,
            payload,
        }
    }
}

/// Outcome of pushing one record to every live connection
#[derive(Debug, Clone, Serialize)]
pub(crate) struct BroadcastReport {
    pub(crate) delivered: usize,
    pub(crate) pruned: usize,
}

impl From<Delivery> for BroadcastReport {
    fn from(delivery: Delivery) -> Self {
        Self {
            delivered: delivery.delivered,
            pruned: delivery.pruned,
        }
    }
}

/// Position of a freshly appended record
#[derive(Debug, Clone, Serialize)]
pub(crate) struct PublishedRecord {
    pub(crate) id: RecordId,
    pub(crate) stream: StreamName,
}
