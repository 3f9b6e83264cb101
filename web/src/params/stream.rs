use crate::Error;
use events::StreamName;
use serde::Deserialize;
use stream::replay::DEFAULT_REPLAY_COUNT;

/// Upper bound on records returned by one replay request.
pub(crate) const MAX_REPLAY_COUNT: usize = 1000;

/// Resolve the `{match|odds}` path segment.
pub(crate) fn parse_stream(name: &str) -> Result<StreamName, Error> {
    name.parse::<StreamName>()
        .map_err(|_| Error::BadRequest(format!("Unknown stream {name:?}, expected match or odds")))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplayParams {
    #[serde(default = "default_replay_count")]
    pub(crate) count: usize,
}

fn default_replay_count() -> usize {
    DEFAULT_REPLAY_COUNT
}

impl ReplayParams {
    pub(crate) fn count(&self) -> Result<usize, Error> {
        match self.count {
            0 => Err(Error::BadRequest("count must be positive".to_string())),
            count => Ok(count.min(MAX_REPLAY_COUNT)),
        }
    }
}

/// When a scheduled push becomes due. Exactly one of the two must be given.
///
/// * `due_at` - milliseconds since the epoch
/// * `delay_secs` - seconds from now
#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleParams {
    pub(crate) due_at: Option<i64>,
    pub(crate) delay_secs: Option<u64>,
}

impl ScheduleParams {
    pub(crate) fn due_at_millis(&self, now_millis: i64) -> Result<i64, Error> {
        match (self.due_at, self.delay_secs) {
            (Some(due_at), None) => Ok(due_at),
            (None, Some(delay_secs)) => {
                let delay_millis = i64::try_from(delay_secs)
                    .ok()
                    .and_then(|secs| secs.checked_mul(1000))
                    .ok_or_else(|| Error::BadRequest("delay_secs is too large".to_string()))?;
                Ok(now_millis.saturating_add(delay_millis))
            }
            _ => Err(Error::BadRequest(
                "Exactly one of due_at or delay_secs is required".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_count_is_clamped() {
        assert_eq!(ReplayParams { count: 5 }.count().unwrap(), 5);
        assert_eq!(ReplayParams { count: 50_000 }.count().unwrap(), MAX_REPLAY_COUNT);
        assert!(ReplayParams { count: 0 }.count().is_err());
    }

    #[test]
    fn test_schedule_needs_exactly_one_time() {
        let relative = ScheduleParams {
            due_at: None,
            delay_secs: Some(30),
        };
        let both = ScheduleParams {
            due_at: Some(1),
            delay_secs: Some(1),
        };
        let neither = ScheduleParams {
            due_at: None,
            delay_secs: None,
        };

        assert_eq!(relative.due_at_millis(1_000).unwrap(), 31_000);
        assert!(both.due_at_millis(0).is_err());
        assert!(neither.due_at_millis(0).is_err());
    }

    #[test]
    fn test_stream_segment() {
        assert_eq!(parse_stream("odds").unwrap(), StreamName::Odds);
        assert!(parse_stream("scores").is_err());
    }
}
