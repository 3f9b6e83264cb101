use crate::params::handshake::HandshakeParams;
use crate::{AppState, Error};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::*;
use push::connection::{ClientIdentity, ConnectionId};
use push::error::{ConnectionErrorKind, ErrorKind as PushErrorKind};
use push::session;
use push::Manager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

/// Upgrade handler for `/ws?token=<token>`.
///
/// The handshake is authenticated before the upgrade: a refused caller gets a
/// plain 403 and no connection state is created.
pub(crate) async fn ws_handler(
    State(app_state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, Error> {
    let admission = app_state
        .authenticator
        .authenticate(remote_addr.ip(), params.token.as_deref())
        .await?;

    let Some(ws) = ws else {
        return Ok((StatusCode::UPGRADE_REQUIRED, "UPGRADE REQUIRED").into_response());
    };

    let identity = ClientIdentity {
        client_id: admission.client_id,
        remote_addr,
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        token: admission.token,
        connected_at: Utc::now(),
    };
    debug!(
        "Upgrading WebSocket for client {} from {}",
        identity.client_id, remote_addr
    );

    let manager = app_state.manager.clone();
    Ok(ws.on_upgrade(move |socket| serve_connection(socket, manager, identity)))
}

/// Drive one admitted connection until either side goes away.
async fn serve_connection(socket: WebSocket, manager: Arc<Manager>, identity: ClientIdentity) {
    let (connection_id, outbound) = manager.register_connection(identity);
    let (sink, mut inbound) = socket.split();
    let mut writer = tokio::spawn(write_outbound(connection_id.clone(), sink, outbound));

    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if !handle_text(&manager, &connection_id, &text) {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    debug!("Ignoring binary frame from connection {}", connection_id);
                    manager.touch(&connection_id);
                }
                // Control frames count as activity; axum answers pings itself
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => manager.touch(&connection_id),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Read error on connection {}: {}", connection_id, e);
                    break;
                }
            },
            // The registry dropped the connection (heartbeat or a failed send)
            _ = &mut writer => break,
        }
    }

    manager.unregister_connection(&connection_id);
    writer.abort();
    info!("WebSocket connection {} closed", connection_id);
}

/// Returns false when the connection should be closed.
fn handle_text(manager: &Manager, connection_id: &ConnectionId, text: &str) -> bool {
    let reply = match session::dispatch(manager, connection_id, text) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Connection {} could not apply {:?}: {}", connection_id, text, e);
            return e.error_kind != PushErrorKind::Connection(ConnectionErrorKind::NotFound);
        }
    };

    let Some(reply) = reply else {
        return true;
    };
    match manager.reply(connection_id, &reply) {
        Ok(()) => true,
        Err(e) if e.error_kind == PushErrorKind::Connection(ConnectionErrorKind::QueueFull) => {
            warn!("Dropped reply to connection {}: {}", connection_id, e);
            true
        }
        Err(e) => {
            debug!("Reply to connection {} failed: {}", connection_id, e);
            false
        }
    }
}

/// Forward queued frames to the socket until the registry drops the sender.
async fn write_outbound(
    connection_id: ConnectionId,
    mut sink: futures_util::stream::SplitSink<WebSocket, WsMessage>,
    mut outbound: Receiver<WsMessage>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!("Write to connection {} failed: {}", connection_id, e);
            return;
        }
    }
    trace!("Outbound queue of connection {} closed", connection_id);
    let _ = sink.close().await;
}
