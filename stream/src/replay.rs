//! Recent history of a match, read back from the upstream log.

use crate::error::Error;
use crate::source::EventSource;
use events::{StreamName, StreamRecord};

pub const DEFAULT_REPLAY_COUNT: usize = 10;
/// How far back the log is scanned for records of the requested match.
pub const REPLAY_SCAN_WINDOW: usize = 1000;

/// The most recent `count` records of `stream` for `match_id`, oldest first.
/// Records that do not decode are skipped.
pub async fn replay(
    source: &dyn EventSource,
    stream: StreamName,
    match_id: &str,
    count: usize,
) -> Result<Vec<StreamRecord>, Error> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut matching: Vec<StreamRecord> = source
        .recent(stream, REPLAY_SCAN_WINDOW.max(count))
        .await?
        .into_iter()
        .filter_map(|mut record| {
            let belongs = record
                .decode()
                .map(|payload| payload.match_id() == match_id)
                .unwrap_or(false);
            belongs.then_some(record)
        })
        .collect();

    let skip = matching.len().saturating_sub(count);
    Ok(matching.split_off(skip))
}
