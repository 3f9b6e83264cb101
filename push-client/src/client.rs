//! tokio-tungstenite driver for [`Reconnector`].

use crate::reconnect::{ClientState, Reconnector};
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use log::*;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// Everything the driver reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    State(ClientState),
    /// A JSON frame pushed by the server.
    Frame(Value),
}

/// Handle for issuing subscriptions to a running client. Dropping every handle
/// stops the client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ClientHandle {
    pub fn subscribe(&self, match_id: &str) -> Result<()> {
        self.commands
            .send(Command::Subscribe(match_id.to_string()))
            .map_err(|_| anyhow::anyhow!("client has stopped"))
    }

    pub fn unsubscribe(&self, match_id: &str) -> Result<()> {
        self.commands
            .send(Command::Unsubscribe(match_id.to_string()))
            .map_err(|_| anyhow::anyhow!("client has stopped"))
    }
}

/// Start a reconnecting client. `connect_url` is called before every attempt,
/// so a fresh handshake token can be fetched each time.
///
/// The task ends with the final state: `Failed` when the retry budget is
/// spent, `Closed` when every handle was dropped.
pub fn spawn<F, Fut>(
    connect_url: F,
    base_interval: Duration,
) -> (ClientHandle, mpsc::UnboundedReceiver<ClientEvent>, JoinHandle<ClientState>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let driver = Driver {
        reconnector: Reconnector::new(base_interval),
        commands: command_rx,
        events: event_tx,
    };
    let task = tokio::spawn(driver.run(connect_url));
    (ClientHandle { commands: command_tx }, event_rx, task)
}

struct Driver {
    reconnector: Reconnector,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

enum SessionEnd {
    Disconnected,
    HandlesDropped,
}

impl Driver {
    async fn run<F, Fut>(mut self, mut connect_url: F) -> ClientState
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        loop {
            self.report_state();
            match self.attempt(&mut connect_url).await {
                SessionEnd::HandlesDropped => return ClientState::Closed,
                SessionEnd::Disconnected => {}
            }

            let Some(delay) = self.reconnector.on_closed() else {
                error!(
                    "Giving up after {} consecutive failed reconnects",
                    self.reconnector.retry_count()
                );
                self.report_state();
                return ClientState::Failed;
            };
            self.report_state();
            info!(
                "Reconnect {} scheduled in {:?}",
                self.reconnector.retry_count(),
                delay
            );
            if !self.wait(delay).await {
                return ClientState::Closed;
            }
            self.reconnector.on_reconnect_due();
        }
    }

    async fn attempt<F, Fut>(&mut self, connect_url: &mut F) -> SessionEnd
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let url = match connect_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not prepare connection: {e:#}");
                return SessionEnd::Disconnected;
            }
        };

        let (socket, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Connection failed: {e}");
                return SessionEnd::Disconnected;
            }
        };
        let (mut sink, mut stream) = socket.split();

        let replay = self.reconnector.on_open();
        info!("Connected, restoring {} subscription(s)", replay.len());
        self.report_state();
        for frame in replay {
            if let Err(e) = sink.send(Message::text(frame)).await {
                warn!("Restoring subscriptions failed: {e}");
                return SessionEnd::Disconnected;
            }
        }

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
                        Ok(value) => {
                            let _ = self.events.send(ClientEvent::Frame(value));
                        }
                        Err(e) => debug!("Ignoring non-JSON frame {:?}: {e}", text.as_str()),
                    },
                    Some(Ok(Message::Close(reason))) => {
                        info!("Server closed the connection: {reason:?}");
                        return SessionEnd::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Connection error: {e}");
                        return SessionEnd::Disconnected;
                    }
                    None => return SessionEnd::Disconnected,
                },
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        let _ = sink.close().await;
                        return SessionEnd::HandlesDropped;
                    };
                    if let Some(frame) = self.apply(command) {
                        if let Err(e) = sink.send(Message::text(frame)).await {
                            warn!("Send failed: {e}");
                            return SessionEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }

    /// Sleep for `delay` while still recording subscriptions. Returns false if
    /// every handle was dropped.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.apply(command);
                    }
                    None => return false,
                },
            }
        }
    }

    fn apply(&mut self, command: Command) -> Option<String> {
        match command {
            Command::Subscribe(match_id) => self.reconnector.subscribe(&match_id),
            Command::Unsubscribe(match_id) => self.reconnector.unsubscribe(&match_id),
        }
    }

    fn report_state(&self) {
        let _ = self.events.send(ClientEvent::State(self.reconnector.state()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn next_frame(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Value {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ClientEvent::Frame(value) = event {
                return value;
            }
        }
    }

    /// Accept one connection, collect `expect` text frames, push `reply`, then close.
    async fn serve_once(listener: &TcpListener, expect: usize, reply: &str) -> Vec<String> {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut received = Vec::new();
        while received.len() < expect {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => received.push(text.as_str().to_string()),
                Some(Ok(_)) => {}
                _ => break,
            }
        }
        socket.send(Message::text(reply.to_string())).await.unwrap();
        socket.close(None).await.unwrap();
        received
    }

    #[tokio::test]
    async fn test_subscriptions_are_replayed_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (handle, mut events, _task) =
            spawn(move || std::future::ready(Ok(url.clone())), Duration::from_millis(10));
        handle.subscribe("1001").unwrap();

        let first = serve_once(&listener, 1, r#"{"type":"match_score"}"#).await;
        let sent: Value = serde_json::from_str(&first[0]).unwrap();
        assert_eq!(sent, serde_json::json!({"type": "subscribe", "data": "1001"}));
        assert_eq!(next_frame(&mut events).await["type"], "match_score");

        let second = serve_once(&listener, 1, r#"{"type":"pong"}"#).await;
        assert_eq!(second, first);
        assert_eq!(next_frame(&mut events).await["type"], "pong");
    }

    #[tokio::test]
    async fn test_unreachable_server_ends_in_failed() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (_handle, mut events, task) =
            spawn(move || std::future::ready(Ok(url.clone())), Duration::from_millis(1));

        let final_state = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_state, ClientState::Failed);

        let mut scheduled = 0;
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::State(ClientState::ReconnectScheduled { .. }) = event {
                scheduled += 1;
            }
        }
        assert_eq!(scheduled, 5);
    }
}
