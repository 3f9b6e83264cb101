use crate::connection::{ConnectionId, Topic};
use events::{OddsUpdate, ScoreUpdate, StreamPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trait for getting the wire `type` of an outbound event
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    #[serde(rename = "match_score")]
    MatchScore(ScoreUpdate),
    #[serde(rename = "odds_update")]
    OddsUpdate(OddsUpdate),
    /// Liveness ping sent by the heartbeat.
    #[serde(rename = "ping")]
    Ping,
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::MatchScore(_) => "match_score",
            Event::OddsUpdate(_) => "odds_update",
            Event::Ping => "ping",
        }
    }
}

impl From<&StreamPayload> for Event {
    fn from(payload: &StreamPayload) -> Self {
        match payload {
            StreamPayload::Score(score) => Event::MatchScore(score.clone()),
            StreamPayload::Odds(odds) => Event::OddsUpdate(odds.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub event: Event,
    pub scope: MessageScope,
}

#[derive(Debug, Clone)]
pub enum MessageScope {
    /// Send to every subscriber of a match topic
    Topic { topic: Topic },
    /// Send to one connection
    Connection { connection_id: ConnectionId },
    /// Send to all connections
    Broadcast,
}

/// Commands a client sends over an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(Option<String>),
    /// Leave the given topic, or whatever topic the connection holds when `None`.
    Unsubscribe(Option<String>),
    Ping,
    /// `match_score`, `odds_update` and `event_alert` requests are accepted and logged only.
    Inquiry { kind: InquiryKind, data: Option<String> },
    /// JSON frame with a `type` nobody handles.
    Unknown(String),
    /// Plaintext `subscribe:<matchId>`.
    LegacySubscribe(String),
    /// Plaintext `unsubscribe`.
    LegacyUnsubscribe,
    /// Plaintext that is neither JSON nor a legacy command.
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryKind {
    MatchScore,
    OddsUpdate,
    EventAlert,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

fn data_text(data: Option<Value>) -> Option<String> {
    match data? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

const LEGACY_SUBSCRIBE: &str = "subscribe:";
const LEGACY_UNSUBSCRIBE: &str = "unsubscribe";

impl ClientCommand {
    /// Parse an inbound text frame. JSON frames are matched on `type`
    /// case-insensitively; anything that is not a JSON object falls back to the
    /// plaintext protocol.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<RawFrame>(text) {
            Ok(frame) => {
                let kind = frame.kind.unwrap_or_default();
                let data = data_text(frame.data);
                match kind.to_lowercase().as_str() {
                    "subscribe" => ClientCommand::Subscribe(data),
                    "unsubscribe" => ClientCommand::Unsubscribe(data.filter(|topic| !topic.is_empty())),
                    "ping" => ClientCommand::Ping,
                    "match_score" => ClientCommand::Inquiry {
                        kind: InquiryKind::MatchScore,
                        data,
                    },
                    "odds_update" => ClientCommand::Inquiry {
                        kind: InquiryKind::OddsUpdate,
                        data,
                    },
                    "event_alert" => ClientCommand::Inquiry {
                        kind: InquiryKind::EventAlert,
                        data,
                    },
                    _ => ClientCommand::Unknown(kind),
                }
            }
            Err(_) => {
                if let Some(topic) = text.strip_prefix(LEGACY_SUBSCRIBE) {
                    ClientCommand::LegacySubscribe(topic.trim().to_string())
                } else if text.trim() == LEGACY_UNSUBSCRIBE {
                    ClientCommand::LegacyUnsubscribe
                } else {
                    ClientCommand::Unrecognized
                }
            }
        }
    }
}

/// `{"type": ..., "message": ...}` reply to a JSON command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerReply {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyStatus {
    Success,
    Error,
}

/// `{"status": ..., "message": ...}` reply to a plaintext command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyReply {
    pub status: LegacyStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Server(ServerReply),
    Legacy(LegacyReply),
}

impl Reply {
    pub fn server(kind: &'static str, message: impl Into<String>) -> Self {
        Reply::Server(ServerReply {
            kind,
            message: message.into(),
        })
    }

    pub fn legacy(status: LegacyStatus, message: impl Into<String>) -> Self {
        Reply::Legacy(LegacyReply {
            status,
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Reply::Server(reply) => serde_json::to_string(reply),
            Reply::Legacy(reply) => serde_json::to_string(reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_match_score_event_envelope() {
        let event = Event::MatchScore(ScoreUpdate {
            match_id: "1001".to_string(),
            home_score: 1,
            away_score: 0,
            minute: 10,
            period: "1H".to_string(),
            status: "live".to_string(),
        });

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "match_score");
        assert_eq!(value["data"]["matchId"], "1001");
        assert_eq!(value["data"]["homeScore"], 1);
        assert_eq!(event.event_type(), "match_score");
    }

    #[test]
    fn test_ping_event_has_no_data() {
        let value = serde_json::to_value(Event::Ping).unwrap();

        assert_eq!(value, json!({"type": "ping"}));
    }

    #[test]
    fn test_parse_json_commands_case_insensitively() {
        assert_eq!(
            ClientCommand::parse(r#"{"type":"SUBSCRIBE","data":"1001"}"#),
            ClientCommand::Subscribe(Some("1001".to_string()))
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"subscribe","data":1001}"#),
            ClientCommand::Subscribe(Some("1001".to_string()))
        );
        assert_eq!(ClientCommand::parse(r#"{"type":"Ping"}"#), ClientCommand::Ping);
        assert_eq!(
            ClientCommand::parse(r#"{"type":"unsubscribe"}"#),
            ClientCommand::Unsubscribe(None)
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"unsubscribe","data":"1001"}"#),
            ClientCommand::Unsubscribe(Some("1001".to_string()))
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"event_alert","data":"red card"}"#),
            ClientCommand::Inquiry {
                kind: InquiryKind::EventAlert,
                data: Some("red card".to_string())
            }
        );
    }

    #[test]
    fn test_parse_unknown_json_type() {
        assert_eq!(
            ClientCommand::parse(r#"{"type":"teleport"}"#),
            ClientCommand::Unknown("teleport".to_string())
        );
        assert_eq!(
            ClientCommand::parse(r#"{"data":"1"}"#),
            ClientCommand::Unknown(String::new())
        );
    }

    #[test]
    fn test_parse_legacy_commands() {
        assert_eq!(
            ClientCommand::parse("subscribe: 2002 "),
            ClientCommand::LegacySubscribe("2002".to_string())
        );
        assert_eq!(ClientCommand::parse("unsubscribe"), ClientCommand::LegacyUnsubscribe);
        assert_eq!(ClientCommand::parse(" unsubscribe\n"), ClientCommand::LegacyUnsubscribe);
        assert_eq!(ClientCommand::parse("unsubscribeXYZ"), ClientCommand::Unrecognized);
        assert_eq!(ClientCommand::parse("hello"), ClientCommand::Unrecognized);
    }

    #[test]
    fn test_reply_shapes() {
        let server = Reply::server("pong", "Keepalive").to_json().unwrap();
        let legacy = Reply::legacy(LegacyStatus::Error, "Unknown command").to_json().unwrap();

        assert_eq!(
            serde_json::from_str::<Value>(&server).unwrap(),
            json!({"type": "pong", "message": "Keepalive"})
        );
        assert_eq!(
            serde_json::from_str::<Value>(&legacy).unwrap(),
            json!({"status": "error", "message": "Unknown command"})
        );
    }
}
