use crate::controller::ApiResponse;
use crate::{AppState, Error};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;

/// GET connection statistics
///
/// Body: `{"total_connections": n, "active_subscribers": n, "match_subscriptions": {topic: n}}`
pub async fn websocket(State(app_state): State<AppState>) -> impl IntoResponse {
    let stats = app_state.manager.stats();
    debug!(
        "GET websocket stats: {} connection(s), {} subscriber(s)",
        stats.total_connections, stats.active_subscribers
    );
    Json(stats)
}

/// GET pending and idle figures for every consumer group member
pub async fn consumers(State(app_state): State<AppState>) -> Result<impl IntoResponse, Error> {
    debug!("GET consumer group health");

    let reports = app_state.consumer_health.check().await?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), reports)))
}
