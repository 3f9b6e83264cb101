use crate::connection::{
    ClientIdentity, ConnectionId, ConnectionRegistry, ConnectionSnapshot, FanoutReport, RegistryStats, Topic,
};
use crate::error::Error;
use crate::message::{Event, EventType, Message as PushMessage, MessageScope, Reply};
use axum::extract::ws::Message as WsMessage;
use events::{Delivery, DeliveryError, DeliveryErrorKind};
use log::*;
use tokio::sync::mpsc::{self, Receiver};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub struct Manager {
    registry: ConnectionRegistry,
    queue_capacity: usize,
}

impl Manager {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register a new connection. The receiver yields every frame queued for it.
    pub fn register_connection(&self, identity: ClientIdentity) -> (ConnectionId, Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let client_id = identity.client_id.clone();
        let remote_addr = identity.remote_addr;
        let connection_id = self.registry.add(identity, tx);
        info!(
            "Registered connection {} for client {} from {}",
            connection_id, client_id, remote_addr
        );
        (connection_id, rx)
    }

    /// Unregister a connection by ID. Safe to call more than once.
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        if self.registry.remove(connection_id) {
            info!("Unregistered connection {}", connection_id);
        }
    }

    pub fn subscribe(&self, connection_id: &ConnectionId, topic: &str) -> Result<Option<Topic>, Error> {
        let previous = self.registry.subscribe(connection_id, topic)?;
        debug!(
            "Connection {} subscribed to {} (left {:?})",
            connection_id, topic, previous
        );
        Ok(previous)
    }

    pub fn unsubscribe(&self, connection_id: &ConnectionId, topic: Option<&str>) -> Result<Option<Topic>, Error> {
        let left = self.registry.unsubscribe(connection_id, topic)?;
        if let Some(topic) = &left {
            debug!("Connection {} unsubscribed from {}", connection_id, topic);
        }
        Ok(left)
    }

    pub fn touch(&self, connection_id: &ConnectionId) {
        self.registry.touch(connection_id);
    }

    /// Queue a protocol reply for one connection.
    pub fn reply(&self, connection_id: &ConnectionId, reply: &Reply) -> Result<(), Error> {
        let body = match reply.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize reply for connection {}: {e}", connection_id);
                return Ok(());
            }
        };
        self.registry.send_to(connection_id, WsMessage::Text(body))
    }

    /// Send a message based on its scope
    pub fn send_message(&self, message: PushMessage) -> Result<Delivery, DeliveryError> {
        let event_type = message.event.event_type();
        let target = match &message.scope {
            MessageScope::Topic { topic } => topic.clone(),
            MessageScope::Connection { connection_id } => connection_id.to_string(),
            MessageScope::Broadcast => "*".to_string(),
        };

        let frame = serde_json::to_string(&message.event).map_err(|e| {
            error!("Failed to serialize {event_type} event: {e}");
            DeliveryError {
                topic: target.clone(),
                kind: DeliveryErrorKind::Encode(e.to_string()),
            }
        })?;
        let frame = WsMessage::Text(frame);

        let report = match message.scope {
            MessageScope::Topic { topic } => self.registry.fanout(&topic, frame),
            MessageScope::Broadcast => self.registry.broadcast(frame),
            MessageScope::Connection { connection_id } => {
                return self
                    .registry
                    .send_to(&connection_id, frame)
                    .map(|()| Delivery {
                        delivered: 1,
                        pruned: 0,
                    })
                    .map_err(|e| DeliveryError {
                        topic: target,
                        kind: DeliveryErrorKind::Unavailable(e.to_string()),
                    });
            }
        };

        into_delivery(target, event_type, report)
    }

    /// Fan an event out to every subscriber of `topic`.
    pub fn fanout(&self, topic: &str, event: Event) -> Result<Delivery, DeliveryError> {
        self.send_message(PushMessage {
            event,
            scope: MessageScope::Topic {
                topic: topic.to_string(),
            },
        })
    }

    /// Send an event to all live connections.
    pub fn broadcast(&self, event: Event) -> Result<Delivery, DeliveryError> {
        self.send_message(PushMessage {
            event,
            scope: MessageScope::Broadcast,
        })
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn connection(&self, connection_id: &ConnectionId) -> Option<ConnectionSnapshot> {
        self.registry.snapshot(connection_id)
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

fn into_delivery(target: String, event_type: &str, report: FanoutReport) -> Result<Delivery, DeliveryError> {
    if report.saturated > 0 {
        warn!(
            "Delivery of {} to {} saturated: {} full, {} delivered",
            event_type, target, report.saturated, report.delivered
        );
        return Err(DeliveryError {
            topic: target,
            kind: DeliveryErrorKind::Saturated {
                failed: report.saturated,
                delivered: report.delivered,
            },
        });
    }

    trace!(
        "Delivered {} to {} connection(s) on {}",
        event_type,
        report.delivered,
        target
    );
    Ok(Delivery {
        delivered: report.delivered,
        pruned: report.pruned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::identity;
    use events::ScoreUpdate;

    fn score(match_id: &str) -> Event {
        Event::MatchScore(ScoreUpdate {
            match_id: match_id.to_string(),
            home_score: 2,
            away_score: 1,
            minute: 77,
            period: "2H".to_string(),
            status: "live".to_string(),
        })
    }

    #[test]
    fn test_fanout_reaches_only_topic_subscribers() {
        let manager = Manager::new();
        let (subscriber, mut subscriber_rx) = manager.register_connection(identity());
        let (_bystander, mut bystander_rx) = manager.register_connection(identity());
        manager.subscribe(&subscriber, "1001").unwrap();

        let delivery = manager.fanout("1001", score("1001")).unwrap();

        assert_eq!(delivery.delivered, 1);
        match subscriber_rx.try_recv() {
            Ok(WsMessage::Text(body)) => {
                let value: serde_json::Value = serde_json::from_str(&body).unwrap();
                assert_eq!(value["type"], "match_score");
                assert_eq!(value["data"]["minute"], 77);
            }
            other => panic!("expected text frame, got {other:?}"),
        }
        assert!(bystander_rx.try_recv().is_err());
    }

    #[test]
    fn test_fanout_to_empty_topic_succeeds_with_no_delivery() {
        let manager = Manager::new();

        let delivery = manager.fanout("nobody", score("nobody")).unwrap();

        assert_eq!(delivery, Delivery::default());
    }

    #[test]
    fn test_saturated_subscriber_is_a_delivery_error() {
        let manager = Manager::with_queue_capacity(1);
        let (id, _rx) = manager.register_connection(identity());
        manager.subscribe(&id, "1001").unwrap();
        manager.fanout("1001", score("1001")).unwrap();

        let err = manager.fanout("1001", score("1001")).unwrap_err();

        assert_eq!(err.topic, "1001");
        assert_eq!(
            err.kind,
            DeliveryErrorKind::Saturated {
                failed: 1,
                delivered: 0
            }
        );
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let manager = Manager::new();
        let (_a, mut a_rx) = manager.register_connection(identity());
        let (_b, mut b_rx) = manager.register_connection(identity());

        let delivery = manager.broadcast(Event::Ping).unwrap();

        assert_eq!(delivery.delivered, 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let manager = Manager::new();
        let (id, _rx) = manager.register_connection(identity());

        manager.unregister_connection(&id);
        manager.unregister_connection(&id);

        assert!(manager.connection(&id).is_none());
        assert_eq!(manager.stats().total_connections, 0);
    }
}
