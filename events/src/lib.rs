//! Event model for the sports push service.
//!
//! This crate provides the typed records that flow from the upstream event log
//! to connected push clients, plus the seam the stream consumer uses to hand a
//! decoded record to the fan-out layer.
//!
//! # Architecture
//!
//! - **ScoreUpdate / OddsUpdate**: JSON bodies of the `match` and `odds` streams
//! - **StreamRecord**: one record read from a stream, raw and (once decoded) typed
//! - **EventHandler**: trait implemented by the push layer to fan a payload out
//!   to every subscriber of its match topic
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies between the consumer (`stream`) and the push layer (`push`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

/// Match identifier. Used as the fan-out topic.
pub type MatchId = String;

/// Score change for a single match, as published on the `match` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    pub match_id: MatchId,
    pub home_score: u32,
    pub away_score: u32,
    pub minute: u32,
    pub period: String,
    pub status: String,
}

/// Odds change from a bookmaker, as published on the `odds` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OddsUpdate {
    pub match_id: MatchId,
    pub bookmaker: String,
    pub odds_type: String,
    pub handicap: String,
    pub home_odds: f64,
    pub away_odds: f64,
    /// Milliseconds since the epoch at which the bookmaker changed the line.
    #[serde(rename = "timestamp")]
    pub event_timestamp_millis: i64,
}

/// Logical stream a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Match,
    Odds,
}

impl StreamName {
    pub const ALL: [StreamName; 2] = [StreamName::Match, StreamName::Odds];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Match => "match",
            StreamName::Odds => "odds",
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StreamNameParseError(pub String);

impl FromStr for StreamName {
    type Err = StreamNameParseError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_lowercase().as_str() {
            "match" => Ok(StreamName::Match),
            "odds" => Ok(StreamName::Odds),
            other => Err(StreamNameParseError(other.to_string())),
        }
    }
}

/// Monotonic per-stream record id, used to acknowledge a record against its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded body of a stream record.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    Score(ScoreUpdate),
    Odds(OddsUpdate),
}

impl StreamPayload {
    /// Decode a raw JSON body into the typed form that belongs to `stream`.
    pub fn decode(stream: StreamName, raw: &str) -> Result<Self, serde_json::Error> {
        match stream {
            StreamName::Match => serde_json::from_str(raw).map(StreamPayload::Score),
            StreamName::Odds => serde_json::from_str(raw).map(StreamPayload::Odds),
        }
    }

    pub fn match_id(&self) -> &str {
        match self {
            StreamPayload::Score(score) => &score.match_id,
            StreamPayload::Odds(odds) => &odds.match_id,
        }
    }

    pub fn stream(&self) -> StreamName {
        match self {
            StreamPayload::Score(_) => StreamName::Match,
            StreamPayload::Odds(_) => StreamName::Odds,
        }
    }
}

/// A record as read from the upstream log.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub stream: StreamName,
    pub id: RecordId,
    pub raw: String,
    pub parsed: Option<StreamPayload>,
}

impl StreamRecord {
    pub fn new(stream: StreamName, id: RecordId, raw: impl Into<String>) -> Self {
        Self {
            stream,
            id,
            raw: raw.into(),
            parsed: None,
        }
    }

    /// Decode the raw body, caching the typed payload on success.
    pub fn decode(&mut self) -> Result<&StreamPayload, serde_json::Error> {
        let payload = match self.parsed.take() {
            Some(payload) => payload,
            None => StreamPayload::decode(self.stream, &self.raw)?,
        };
        Ok(self.parsed.insert(payload))
    }
}

/// Outcome of a successful fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Closed connections found (and removed) during delivery.
    pub pruned: usize,
}

/// Fan-out failure that the caller may retry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryError {
    pub topic: String,
    pub kind: DeliveryErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryErrorKind {
    /// Some live subscribers could not accept the message (send queue full).
    Saturated { failed: usize, delivered: usize },
    /// The payload could not be rendered into an outbound frame.
    Encode(String),
    /// The fan-out target is not accepting messages at all.
    Unavailable(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            DeliveryErrorKind::Saturated { failed, delivered } => write!(
                f,
                "fan-out to topic {} saturated: {failed} failed, {delivered} delivered",
                self.topic
            ),
            DeliveryErrorKind::Encode(reason) => {
                write!(f, "fan-out to topic {} failed to encode: {reason}", self.topic)
            }
            DeliveryErrorKind::Unavailable(reason) => {
                write!(f, "fan-out to topic {} unavailable: {reason}", self.topic)
            }
        }
    }
}

impl StdError for DeliveryError {}

/// Trait for delivering decoded stream payloads to subscribers.
/// Implemented by the push layer; used by the stream consumer, the DLQ
/// reprocessor and the delayed-delivery dispatcher so all three share one
/// fan-out path.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &StreamPayload) -> Result<Delivery, DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORE_JSON: &str = r#"{"matchId":"1001","homeScore":1,"awayScore":0,"minute":10,"period":"1H","status":"live"}"#;

    #[test]
    fn test_decode_score_update_from_match_stream() {
        let payload = StreamPayload::decode(StreamName::Match, SCORE_JSON).unwrap();

        assert_eq!(payload.match_id(), "1001");
        assert_eq!(payload.stream(), StreamName::Match);
        match payload {
            StreamPayload::Score(score) => {
                assert_eq!(score.home_score, 1);
                assert_eq!(score.away_score, 0);
                assert_eq!(score.minute, 10);
                assert_eq!(score.period, "1H");
            }
            other => panic!("expected score update, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_odds_update_reads_timestamp_field() {
        let raw = r#"{"matchId":"7","bookmaker":"b1","oddsType":"asian","handicap":"-0.5","homeOdds":1.85,"awayOdds":2.05,"timestamp":1700000000000}"#;

        let payload = StreamPayload::decode(StreamName::Odds, raw).unwrap();

        match payload {
            StreamPayload::Odds(odds) => {
                assert_eq!(odds.match_id, "7");
                assert_eq!(odds.event_timestamp_millis, 1_700_000_000_000);
            }
            other => panic!("expected odds update, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_against_wrong_stream_fails() {
        assert!(StreamPayload::decode(StreamName::Odds, SCORE_JSON).is_err());
        assert!(StreamPayload::decode(StreamName::Match, "not json").is_err());
    }

    #[test]
    fn test_stream_record_caches_decoded_payload() {
        let mut record = StreamRecord::new(StreamName::Match, RecordId(3), SCORE_JSON);

        assert_eq!(record.decode().unwrap().match_id(), "1001");
        assert!(record.parsed.is_some());
    }

    #[test]
    fn test_stream_name_round_trips_through_str() {
        for name in StreamName::ALL {
            assert_eq!(name.as_str().parse::<StreamName>(), Ok(name));
        }
        assert!("scores".parse::<StreamName>().is_err());
    }
}
