//! HTTP and WebSocket surface of the push service.
//!
//! - `GET /ws?token=..` upgrades to a push connection once the handshake
//!   authenticator admits the caller
//! - `/api/v1/..` exposes token refresh and revocation, connection statistics,
//!   stream replay, publishing, broadcasts and scheduled pushes
//! - `/health` for liveness checks

use auth::HandshakeAuthenticator;
use log::*;
use push::Manager;
use service::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use stream::{ConsumerGroupHealthCheck, DelayedStore, EventSource};
use tokio::sync::watch;

mod controller;
mod error;
mod params;
mod response;
pub mod router;
mod ws;

pub use error::{Error, Result};

/// Shared state handed to every handler.
/// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub authenticator: Arc<HandshakeAuthenticator>,
    pub event_source: Arc<dyn EventSource>,
    pub delayed_store: Arc<dyn DelayedStore>,
    pub consumer_health: Arc<ConsumerGroupHealthCheck>,
}

impl AppState {
    pub fn new(
        manager: Arc<Manager>,
        authenticator: Arc<HandshakeAuthenticator>,
        event_source: Arc<dyn EventSource>,
        delayed_store: Arc<dyn DelayedStore>,
        consumer_health: Arc<ConsumerGroupHealthCheck>,
    ) -> Self {
        Self {
            manager,
            authenticator,
            event_source,
            delayed_store,
            consumer_health,
        }
    }
}

/// Bind the configured interface and serve until `shutdown` flips to true.
pub async fn init_server(
    config: &Config,
    app_state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let interface = config.interface.as_deref().unwrap_or("127.0.0.1");
    let listen_addr = format!("{}:{}", interface, config.port);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("Server starting... listening for connections on http://{listen_addr}");

    axum::serve(
        listener,
        router::define_routes(app_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        info!("Server shutting down");
    })
    .await
}
