use crate::error::{connection_error, ConnectionErrorKind, Error};
use axum::extract::ws::Message as WsMessage;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

/// Match identifier used as a subscription topic.
pub type Topic = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is on the other end of a connection, fixed at handshake time.
#[derive(Debug, Clone, Serialize)]
pub struct ClientIdentity {
    pub client_id: String,
    pub remote_addr: SocketAddr,
    pub user_agent: Option<String>,
    #[serde(skip_serializing)]
    pub token: String,
    pub connected_at: DateTime<Utc>,
}

/// Registry-owned state of one live connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub identity: ClientIdentity,
    pub last_active_at: DateTime<Utc>,
    pub topic: Option<Topic>,
    messages_sent: AtomicU64,
    sender: Sender<WsMessage>,
}

impl ConnectionInfo {
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    fn try_send(&self, message: WsMessage) -> Result<(), TrySendError<WsMessage>> {
        self.sender.try_send(message)?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Point-in-time copy of a connection's state for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub identity: ClientIdentity,
    pub last_active_at: DateTime<Utc>,
    pub topic: Option<Topic>,
    pub messages_sent: u64,
}

/// Counts reported by the statistics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub active_subscribers: usize,
    pub match_subscriptions: BTreeMap<Topic, usize>,
}

/// Result of pushing one message to a set of connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Live connections whose queue was full.
    pub saturated: usize,
    /// Closed connections removed while delivering.
    pub pruned: usize,
}

/// Connection registry with a topic index for O(1) subscriber lookups.
///
/// Locks are always taken connection entry first, then topic bucket; the
/// topic index is never held while a connection entry is locked by the caller.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: subscribers of each match topic - O(1)
    topic_index: DashMap<Topic, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            topic_index: DashMap::new(),
        }
    }

    /// Register a new connection - O(1)
    pub fn add(&self, identity: ClientIdentity, sender: Sender<WsMessage>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let now = Utc::now();

        self.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                identity,
                last_active_at: now,
                topic: None,
                messages_sent: AtomicU64::new(0),
                sender,
            },
        );

        connection_id
    }

    /// Remove a connection and its topic membership. Idempotent.
    /// Returns true if this call removed it.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        match self.connections.entry(connection_id.clone()) {
            Entry::Occupied(entry) => {
                if let Some(topic) = &entry.get().topic {
                    self.leave_bucket(topic, connection_id);
                }
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Move a connection onto `topic`, vacating its previous topic first.
    /// Returns the topic it left, if any. Resubscribing to the current topic is a no-op.
    pub fn subscribe(&self, connection_id: &ConnectionId, topic: &str) -> Result<Option<Topic>, Error> {
        let mut info = self.connections.get_mut(connection_id).ok_or_else(|| {
            connection_error(
                ConnectionErrorKind::NotFound,
                &format!("Connection {connection_id} not registered"),
            )
        })?;

        if info.topic.as_deref() == Some(topic) {
            return Ok(None);
        }

        let previous = info.topic.take();
        if let Some(old) = &previous {
            self.leave_bucket(old, connection_id);
        }
        self.topic_index
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id.clone());
        info.topic = Some(topic.to_string());

        Ok(previous)
    }

    /// Leave the current topic. With `Some(topic)` the call only acts when it
    /// matches the current subscription. Returns the topic that was left.
    pub fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        topic: Option<&str>,
    ) -> Result<Option<Topic>, Error> {
        let mut info = self.connections.get_mut(connection_id).ok_or_else(|| {
            connection_error(
                ConnectionErrorKind::NotFound,
                &format!("Connection {connection_id} not registered"),
            )
        })?;

        let matches = match (topic, info.topic.as_deref()) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(requested), Some(current)) => requested == current,
        };
        if !matches {
            return Ok(None);
        }

        let left = info.topic.take();
        if let Some(old) = &left {
            self.leave_bucket(old, connection_id);
        }
        Ok(left)
    }

    fn leave_bucket(&self, topic: &str, connection_id: &ConnectionId) {
        if let Entry::Occupied(mut bucket) = self.topic_index.entry(topic.to_string()) {
            bucket.get_mut().remove(connection_id);
            // Clean up empty topic entries
            if bucket.get().is_empty() {
                bucket.remove();
            }
        }
    }

    /// Queue `message` for every subscriber of `topic`.
    /// Closed connections found on the way are removed.
    pub fn fanout(&self, topic: &str, message: WsMessage) -> FanoutReport {
        let subscribers: Vec<ConnectionId> = match self.topic_index.get(topic) {
            Some(bucket) => bucket.iter().cloned().collect(),
            None => return FanoutReport::default(),
        };
        self.deliver(subscribers, message)
    }

    /// Queue `message` for every live connection - O(n)
    pub fn broadcast(&self, message: WsMessage) -> FanoutReport {
        let everyone: Vec<ConnectionId> = self.connections.iter().map(|entry| entry.key().clone()).collect();
        self.deliver(everyone, message)
    }

    fn deliver(&self, targets: Vec<ConnectionId>, message: WsMessage) -> FanoutReport {
        let mut report = FanoutReport::default();
        let mut closed = Vec::new();

        for connection_id in targets {
            let Some(info) = self.connections.get(&connection_id) else {
                continue;
            };
            match info.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound queue full for connection {}", connection_id);
                    report.saturated += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(connection_id.clone()),
            }
        }

        for connection_id in closed {
            if self.remove(&connection_id) {
                debug!("Pruned closed connection {} during delivery", connection_id);
                report.pruned += 1;
            }
        }

        report
    }

    /// Queue a message for a single connection.
    pub fn send_to(&self, connection_id: &ConnectionId, message: WsMessage) -> Result<(), Error> {
        let result = match self.connections.get(connection_id) {
            Some(info) => info.try_send(message),
            None => {
                return Err(connection_error(
                    ConnectionErrorKind::NotFound,
                    &format!("Connection {connection_id} not registered"),
                ))
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(connection_error(
                ConnectionErrorKind::QueueFull,
                &format!("Outbound queue full for connection {connection_id}"),
            )),
            Err(TrySendError::Closed(_)) => {
                self.remove(connection_id);
                Err(connection_error(
                    ConnectionErrorKind::Closed,
                    &format!("Connection {connection_id} closed"),
                ))
            }
        }
    }

    /// Send `ping` to every connection and remove those that cannot take it.
    /// Returns the ids that were removed.
    pub fn ping_all(&self, ping: WsMessage) -> Vec<ConnectionId> {
        let failed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().try_send(ping.clone()).is_err())
            .map(|entry| entry.key().clone())
            .collect();

        failed
            .into_iter()
            .filter(|connection_id| self.remove(connection_id))
            .collect()
    }

    /// Record inbound activity on a connection.
    pub fn touch(&self, connection_id: &ConnectionId) {
        if let Some(mut info) = self.connections.get_mut(connection_id) {
            info.last_active_at = Utc::now();
        }
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn topic_of(&self, connection_id: &ConnectionId) -> Option<Topic> {
        self.connections
            .get(connection_id)
            .and_then(|info| info.topic.clone())
    }

    /// Connection ids currently subscribed to `topic`.
    pub fn subscribers(&self, topic: &str) -> HashSet<ConnectionId> {
        self.topic_index
            .get(topic)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, connection_id: &ConnectionId) -> Option<ConnectionSnapshot> {
        self.connections.get(connection_id).map(|info| ConnectionSnapshot {
            connection_id: connection_id.clone(),
            identity: info.identity.clone(),
            last_active_at: info.last_active_at,
            topic: info.topic.clone(),
            messages_sent: info.messages_sent(),
        })
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let match_subscriptions: BTreeMap<Topic, usize> = self
            .topic_index
            .iter()
            .map(|bucket| (bucket.key().clone(), bucket.value().len()))
            .collect();

        RegistryStats {
            total_connections: self.connections.len(),
            active_subscribers: match_subscriptions.values().sum(),
            match_subscriptions,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
