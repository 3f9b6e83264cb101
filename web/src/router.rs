use crate::controller::{
    health_check_controller, stats_controller, stream_controller, token_controller,
};
use crate::{ws, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(push_routes(app_state.clone()))
        .merge(token_routes(app_state.clone()))
        .merge(stats_routes(app_state.clone()))
        .merge(stream_routes(app_state))
        // Push clients connect from any origin
        .layer(CorsLayer::permissive())
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn push_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler::ws_handler))
        .with_state(app_state)
}

fn token_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/api/v1/token/refresh", get(token_controller::refresh))
        .route("/api/v1/token/revoke", post(token_controller::revoke))
        .with_state(app_state)
}

fn stats_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/api/v1/stats/websocket", get(stats_controller::websocket))
        .route("/api/v1/stats/consumers", get(stats_controller::consumers))
        .with_state(app_state)
}

fn stream_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/stream/replay/:stream/:match_id",
            get(stream_controller::replay_match),
        )
        .route("/api/v1/stream/:stream", post(stream_controller::publish))
        .route(
            "/api/v1/stream/:stream/delayed",
            post(stream_controller::schedule),
        )
        .route(
            "/api/v1/stream/:stream/broadcast",
            post(stream_controller::broadcast),
        )
        .with_state(app_state)
}
