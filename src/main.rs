//! Sports push service: accepts authenticated WebSocket clients, consumes the
//! score and odds streams and fans every record out to the clients watching
//! its match.

use auth::{HandshakeAuthenticator, IpFilter, MemoryTokenBlacklist, TokenSigner};
use events::{EventHandler, StreamName};
use log::*;
use push::heartbeat::HeartbeatMonitor;
use push::{Manager, PushEventHandler};
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use stream::consumer::ConsumerSettings;
use stream::{
    ConsumerGroupHealthCheck, DelayedDispatcher, DelayedStore, DlqReprocessor, DlqStore,
    EventSource, MemoryDelayedStore, MemoryDlqStore, MemoryEventLog, RetryPolicy, StreamConsumer,
};
use tokio::sync::watch;

/// Only ever used outside production, where a missing secret is fatal.
const DEVELOPMENT_TOKEN_SECRET: &str = "sports-push-development-secret";

#[tokio::main]
async fn main() {
    let config = get_config();
    Logger::init_logger(&config as &Config);

    info!(
        "Starting sports push service v{} [{}]",
        clap::crate_version!(),
        config.runtime_env()
    );

    let blacklist = Arc::new(MemoryTokenBlacklist::new());
    let authenticator = match build_authenticator(&config, blacklist.clone()) {
        Ok(authenticator) => Arc::new(authenticator),
        Err(e) => {
            error!("Failed to configure handshake authentication: {e}");
            std::process::exit(1);
        }
    };

    let manager = Arc::new(Manager::with_queue_capacity(config.outbound_queue_capacity));
    let event_log = Arc::new(MemoryEventLog::new());
    let source: Arc<dyn EventSource> = event_log;
    let dlq: Arc<dyn DlqStore> = Arc::new(MemoryDlqStore::new());
    let delayed: Arc<dyn DelayedStore> = Arc::new(MemoryDelayedStore::new());
    let handler: Arc<dyn EventHandler> = Arc::new(PushEventHandler::new(manager.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        blacklist.run_purge(config.blacklist_purge_interval(), shutdown_rx.clone()),
    ));

    let heartbeat = HeartbeatMonitor::new(manager.clone(), config.heartbeat_interval());
    tasks.push(tokio::spawn(heartbeat.run(shutdown_rx.clone())));

    let consumer_name = config.consumer_name();
    info!("Joining group {} as {consumer_name}", config.consumer_group);
    for stream in StreamName::ALL {
        let consumer = StreamConsumer::new(
            stream,
            source.clone(),
            dlq.clone(),
            handler.clone(),
            RetryPolicy::new(config.delivery_max_retries, config.delivery_retry_unit()),
            ConsumerSettings {
                group: config.consumer_group.clone(),
                consumer: consumer_name.clone(),
                stream_key: stream_key(&config, stream),
                batch_size: config.read_batch_size,
                block: config.read_block(),
                claim_min_idle: config.claim_min_idle(),
            },
        );
        if let Err(e) = consumer.start().await {
            error!("Failed to join consumer group on {stream}: {e}");
            std::process::exit(1);
        }
        tasks.push(tokio::spawn(consumer.run(shutdown_rx.clone())));
    }

    let reprocessor = DlqReprocessor::new(dlq.clone(), handler.clone(), config.dlq_max_redrives);
    tasks.push(tokio::spawn(
        reprocessor.run(config.dlq_sweep_interval(), shutdown_rx.clone()),
    ));

    let dispatcher = DelayedDispatcher::new(delayed.clone(), dlq.clone(), handler.clone());
    tasks.push(tokio::spawn(
        dispatcher.run(config.delayed_sweep_interval(), shutdown_rx.clone()),
    ));

    let consumer_health = ConsumerGroupHealthCheck::new(
        source.clone(),
        config.consumer_group.clone(),
        StreamName::ALL
            .into_iter()
            .map(|stream| (stream, stream_key(&config, stream)))
            .collect(),
        config.consumer_idle_warn(),
    );
    tasks.push(tokio::spawn(
        consumer_health
            .clone()
            .run(config.health_check_interval(), shutdown_rx.clone()),
    ));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let app_state = web::AppState::new(
        manager,
        authenticator,
        source,
        delayed,
        Arc::new(consumer_health),
    );

    if let Err(e) = web::init_server(&config, app_state, shutdown_rx).await {
        error!("Server failed: {e}");
        std::process::exit(1);
    }

    for task in tasks {
        let _ = task.await;
    }
    info!("Sports push service stopped");
}

fn get_config() -> Config {
    let config = Config::new();
    if config.token_secret().is_some() || config.is_production() {
        return config;
    }
    config.set_token_secret(DEVELOPMENT_TOKEN_SECRET.to_string())
}

fn build_authenticator(
    config: &Config,
    blacklist: Arc<MemoryTokenBlacklist>,
) -> Result<HandshakeAuthenticator, auth::Error> {
    let ip_filter = IpFilter::from_patterns(&config.ip_whitelist, &config.ip_blacklist)?;
    let Some(secret) = config.token_secret() else {
        return Err(auth::error::token_error(
            auth::error::TokenErrorKind::InvalidKey,
            "TOKEN_SECRET must be set in production",
        ));
    };
    if secret == DEVELOPMENT_TOKEN_SECRET {
        warn!("TOKEN_SECRET is not set, signing handshake tokens with the development secret");
    }

    Ok(HandshakeAuthenticator::new(
        ip_filter,
        TokenSigner::new(secret),
        blacklist,
    )
    .with_validity(config.token_validity())
    .with_max_future_skew(config.token_max_future_skew()))
}

fn stream_key(config: &Config, stream: StreamName) -> String {
    match stream {
        StreamName::Match => config.match_stream_key.clone(),
        StreamName::Odds => config.odds_stream_key.clone(),
    }
}
