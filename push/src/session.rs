//! In-band client protocol: one inbound text frame in, at most one reply out.

use crate::connection::ConnectionId;
use crate::error::Error;
use crate::message::{ClientCommand, LegacyStatus, Reply};
use crate::Manager;
use log::*;

/// Apply one inbound text frame to the connection's state and produce the
/// reply to send back, if the command has one.
pub fn dispatch(manager: &Manager, connection_id: &ConnectionId, text: &str) -> Result<Option<Reply>, Error> {
    manager.touch(connection_id);
    let command = ClientCommand::parse(text);
    trace!("Connection {} sent {:?}", connection_id, command);

    let reply = match command {
        ClientCommand::Subscribe(Some(topic)) if !topic.is_empty() => {
            manager.subscribe(connection_id, &topic)?;
            Some(Reply::server("subscribed", format!("Subscribed to {topic}")))
        }
        ClientCommand::Subscribe(_) => {
            debug!("Connection {} sent subscribe without a match id", connection_id);
            None
        }
        ClientCommand::Unsubscribe(topic) => manager
            .unsubscribe(connection_id, topic.as_deref())?
            .map(|_| Reply::server("unsubscribed", "Unsubscribed")),
        ClientCommand::Ping => Some(Reply::server("pong", "Keepalive")),
        ClientCommand::Inquiry { kind, data } => {
            info!(
                "Connection {} sent {:?} request: {}",
                connection_id,
                kind,
                data.as_deref().unwrap_or("")
            );
            None
        }
        ClientCommand::Unknown(kind) => {
            warn!("Connection {} sent unknown message type {:?}", connection_id, kind);
            None
        }
        ClientCommand::LegacySubscribe(topic) if topic.is_empty() => {
            Some(Reply::legacy(LegacyStatus::Error, "Missing match id"))
        }
        ClientCommand::LegacySubscribe(topic) => {
            manager.subscribe(connection_id, &topic)?;
            Some(Reply::legacy(
                LegacyStatus::Success,
                format!("Subscribed to {topic}"),
            ))
        }
        ClientCommand::LegacyUnsubscribe => {
            manager.unsubscribe(connection_id, None)?;
            Some(Reply::legacy(LegacyStatus::Success, "Unsubscribed"))
        }
        ClientCommand::Unrecognized => Some(Reply::legacy(LegacyStatus::Error, "Unknown command")),
    };

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::identity;
    use crate::message::ServerReply;

    fn server(kind: &'static str, message: &str) -> Option<Reply> {
        Some(Reply::Server(ServerReply {
            kind,
            message: message.to_string(),
        }))
    }

    #[test]
    fn test_json_subscribe_joins_topic_and_replies() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());

        let reply = dispatch(&manager, &id, r#"{"type":"subscribe","data":"1001"}"#).unwrap();

        assert_eq!(reply, server("subscribed", "Subscribed to 1001"));
        assert!(manager.registry().subscribers("1001").contains(&id));
    }

    #[test]
    fn test_json_unsubscribe_only_replies_when_subscribed() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());

        assert_eq!(dispatch(&manager, &id, r#"{"type":"unsubscribe"}"#).unwrap(), None);

        dispatch(&manager, &id, r#"{"type":"subscribe","data":"1001"}"#).unwrap();
        let reply = dispatch(&manager, &id, r#"{"type":"unsubscribe"}"#).unwrap();

        assert_eq!(reply, server("unsubscribed", "Unsubscribed"));
        assert!(manager.registry().subscribers("1001").is_empty());
    }

    #[test]
    fn test_json_unsubscribe_of_other_topic_keeps_subscription() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());
        dispatch(&manager, &id, r#"{"type":"subscribe","data":"2002"}"#).unwrap();

        let mismatched = dispatch(&manager, &id, r#"{"type":"unsubscribe","data":"1001"}"#).unwrap();

        assert_eq!(mismatched, None);
        assert!(manager.registry().subscribers("2002").contains(&id));
        assert_eq!(manager.registry().topic_of(&id).as_deref(), Some("2002"));

        let matching = dispatch(&manager, &id, r#"{"type":"unsubscribe","data":"2002"}"#).unwrap();

        assert_eq!(matching, server("unsubscribed", "Unsubscribed"));
        assert!(manager.registry().subscribers("2002").is_empty());
    }

    #[test]
    fn test_ping_gets_pong() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());

        let reply = dispatch(&manager, &id, r#"{"type":"ping"}"#).unwrap();

        assert_eq!(reply, server("pong", "Keepalive"));
    }

    #[test]
    fn test_inquiries_and_unknown_types_are_silent() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());

        assert_eq!(dispatch(&manager, &id, r#"{"type":"match_score","data":"1"}"#).unwrap(), None);
        assert_eq!(dispatch(&manager, &id, r#"{"type":"warp"}"#).unwrap(), None);
    }

    #[test]
    fn test_legacy_subscribe_uses_topic_index() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());
        dispatch(&manager, &id, r#"{"type":"subscribe","data":"A"}"#).unwrap();

        let reply = dispatch(&manager, &id, "subscribe:B").unwrap();

        assert_eq!(
            reply,
            Some(Reply::legacy(LegacyStatus::Success, "Subscribed to B"))
        );
        assert!(manager.registry().subscribers("A").is_empty());
        assert!(manager.registry().subscribers("B").contains(&id));
    }

    #[test]
    fn test_legacy_unsubscribe_and_unknown_command() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());
        dispatch(&manager, &id, "subscribe:B").unwrap();

        assert_eq!(
            dispatch(&manager, &id, "unsubscribe").unwrap(),
            Some(Reply::legacy(LegacyStatus::Success, "Unsubscribed"))
        );
        assert!(manager.registry().topic_of(&id).is_none());
        assert_eq!(
            dispatch(&manager, &id, "dance").unwrap(),
            Some(Reply::legacy(LegacyStatus::Error, "Unknown command"))
        );
    }

    #[test]
    fn test_dispatch_on_removed_connection_errors() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());
        manager.unregister_connection(&id);

        assert!(dispatch(&manager, &id, r#"{"type":"subscribe","data":"1"}"#).is_err());
    }
}
