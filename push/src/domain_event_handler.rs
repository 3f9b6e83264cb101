use crate::message::Event;
use crate::Manager;
use async_trait::async_trait;
use events::{Delivery, DeliveryError, EventHandler, StreamPayload};
use log::*;
use std::sync::Arc;

/// Delivers decoded stream payloads to every subscriber of the payload's match.
///
/// The stream consumer, DLQ reprocessor and delayed-delivery dispatcher all go
/// through this handler, so every delivery path shares one fan-out.
pub struct PushEventHandler {
    manager: Arc<Manager>,
}

impl PushEventHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for PushEventHandler {
    async fn handle(&self, payload: &StreamPayload) -> Result<Delivery, DeliveryError> {
        let match_id = payload.match_id();
        debug!(
            "Handling {} record for match {}",
            payload.stream(),
            match_id
        );

        let delivery = self.manager.fanout(match_id, Event::from(payload))?;

        if delivery.pruned > 0 {
            debug!(
                "Pruned {} closed connection(s) while delivering match {}",
                delivery.pruned, match_id
            );
        }
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::identity;
    use axum::extract::ws::Message as WsMessage;
    use events::{OddsUpdate, StreamName};

    #[tokio::test]
    async fn test_odds_payload_reaches_match_subscribers() {
        let manager = Arc::new(Manager::new());
        let (id, mut rx) = manager.register_connection(identity());
        manager.subscribe(&id, "42").unwrap();
        let handler = PushEventHandler::new(manager.clone());

        let payload = StreamPayload::Odds(OddsUpdate {
            match_id: "42".to_string(),
            bookmaker: "b1".to_string(),
            odds_type: "asian".to_string(),
            handicap: "-0.5".to_string(),
            home_odds: 1.9,
            away_odds: 1.95,
            event_timestamp_millis: 1_700_000_000_000,
        });
        assert_eq!(payload.stream(), StreamName::Odds);

        let delivery = handler.handle(&payload).await.unwrap();

        assert_eq!(delivery.delivered, 1);
        match rx.recv().await {
            Some(WsMessage::Text(body)) => {
                let value: serde_json::Value = serde_json::from_str(&body).unwrap();
                assert_eq!(value["type"], "odds_update");
                assert_eq!(value["data"]["timestamp"], 1_700_000_000_000i64);
            }
            other => panic!("expected odds frame, got {other:?}"),
        }
    }
}
