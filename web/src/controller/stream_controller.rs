use crate::controller::ApiResponse;
use crate::params::stream::{parse_stream, ReplayParams, ScheduleParams};
use crate::response::stream::{BroadcastReport, PublishedRecord, ReplayedRecord};
use crate::{AppState, Error};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use events::StreamPayload;
use log::*;
use push::message::Event;
use stream::replay::replay;

/// GET the most recent records of a stream for one match, oldest first
pub async fn replay_match(
    State(app_state): State<AppState>,
    Path((stream, match_id)): Path<(String, String)>,
    Query(params): Query<ReplayParams>,
) -> Result<impl IntoResponse, Error> {
    let stream = parse_stream(&stream)?;
    let count = params.count()?;
    debug!("GET replay of {count} {stream} record(s) for match {match_id}");

    let records: Vec<ReplayedRecord> = replay(app_state.event_source.as_ref(), stream, &match_id, count)
        .await?
        .into_iter()
        .map(ReplayedRecord::from)
        .collect();

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), records)))
}

/// POST append a raw JSON record to a stream
pub async fn publish(
    State(app_state): State<AppState>,
    Path(stream): Path<String>,
    body: String,
) -> Result<impl IntoResponse, Error> {
    let stream = parse_stream(&stream)?;
    let payload = StreamPayload::decode(stream, &body)
        .map_err(|e| Error::BadRequest(format!("Body is not a {stream} record: {e}")))?;
    debug!("POST {stream} record for match {}", payload.match_id());

    let id = app_state.event_source.append(stream, body).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            StatusCode::CREATED.into(),
            PublishedRecord { id, stream },
        )),
    ))
}

/// POST schedule a record to be pushed once it is due
pub async fn schedule(
    State(app_state): State<AppState>,
    Path(stream): Path<String>,
    Query(params): Query<ScheduleParams>,
    body: String,
) -> Result<impl IntoResponse, Error> {
    let stream = parse_stream(&stream)?;
    let payload = StreamPayload::decode(stream, &body)
        .map_err(|e| Error::BadRequest(format!("Body is not a {stream} record: {e}")))?;
    let due_at = params.due_at_millis(Utc::now().timestamp_millis())?;
    debug!(
        "POST delayed {stream} record for match {} due at {due_at}",
        payload.match_id()
    );

    let entry = app_state.delayed_store.schedule(due_at, stream, &body).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED.into(), entry)),
    ))
}

/// POST push a record to every live connection, whatever its subscription
pub async fn broadcast(
    State(app_state): State<AppState>,
    Path(stream): Path<String>,
    body: String,
) -> Result<impl IntoResponse, Error> {
    let stream = parse_stream(&stream)?;
    let payload = StreamPayload::decode(stream, &body)
        .map_err(|e| Error::BadRequest(format!("Body is not a {stream} record: {e}")))?;
    debug!("POST broadcast of {stream} record for match {}", payload.match_id());

    let delivery = app_state.manager.broadcast(Event::from(&payload))?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        BroadcastReport::from(delivery),
    )))
}
