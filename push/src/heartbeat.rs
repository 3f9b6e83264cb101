use crate::message::Event;
use crate::Manager;
use axum::extract::ws::Message as WsMessage;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically pings every connection and removes the ones that cannot
/// accept the ping (writer gone or outbound queue full).
pub struct HeartbeatMonitor {
    manager: Arc<Manager>,
    period: Duration,
}

impl HeartbeatMonitor {
    pub fn new(manager: Arc<Manager>, period: Duration) -> Self {
        Self { manager, period }
    }

    /// One sweep. Returns how many connections were removed.
    pub fn sweep(&self) -> usize {
        let ping = match serde_json::to_string(&Event::Ping) {
            Ok(json) => WsMessage::Text(json),
            Err(e) => {
                error!("Failed to serialize heartbeat ping: {e}");
                return 0;
            }
        };

        let removed = self.manager.registry().ping_all(ping);
        for connection_id in &removed {
            info!("Heartbeat removed unresponsive connection {}", connection_id);
        }
        removed.len()
    }

    /// Sweep on a fixed interval until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!("Heartbeat monitor started ({:?} interval)", self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    debug!(
                        "Heartbeat sweep done: {} removed, {} live",
                        removed,
                        self.manager.registry().len()
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Heartbeat monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::identity;

    #[test]
    fn test_sweep_sends_ping_and_keeps_live_connections() {
        let manager = Arc::new(Manager::new());
        let (id, mut rx) = manager.register_connection(identity());
        let monitor = HeartbeatMonitor::new(manager.clone(), DEFAULT_HEARTBEAT_INTERVAL);

        assert_eq!(monitor.sweep(), 0);

        assert!(manager.registry().contains(&id));
        match rx.try_recv() {
            Ok(WsMessage::Text(body)) => assert_eq!(body, r#"{"type":"ping"}"#),
            other => panic!("expected ping frame, got {other:?}"),
        }
    }

    #[test]
    fn test_sweep_removes_closed_and_stuck_connections() {
        let manager = Arc::new(Manager::with_queue_capacity(1));
        let (closed, closed_rx) = manager.register_connection(identity());
        let (stuck, _stuck_rx) = manager.register_connection(identity());
        let (healthy, _healthy_rx) = manager.register_connection(identity());
        manager.subscribe(&closed, "1001").unwrap();
        drop(closed_rx);
        manager
            .registry()
            .send_to(&stuck, WsMessage::Text("backlog".into()))
            .unwrap();

        let monitor = HeartbeatMonitor::new(manager.clone(), DEFAULT_HEARTBEAT_INTERVAL);

        assert_eq!(monitor.sweep(), 2);
        assert!(!manager.registry().contains(&stuck));
        assert!(manager.registry().contains(&healthy));
        assert!(!manager.registry().contains(&closed));
        assert!(manager.registry().subscribers("1001").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let manager = Arc::new(Manager::new());
        let (_id, mut rx) = manager.register_connection(identity());
        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(HeartbeatMonitor::new(manager, Duration::from_secs(30)).run(shutdown));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(rx.recv().await.is_some());

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
