use crate::controller::ApiResponse;
use crate::params::token::RevokeParams;
use crate::response::token::Revocation;
use crate::{AppState, Error};
use auth::error::{ErrorKind, TokenErrorKind};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;

/// GET a freshly signed handshake token
///
/// Body: `{"token": "<issuedAtMillis>.<signature>", "expires_in": "<seconds>"}`
pub async fn refresh(State(app_state): State<AppState>) -> Result<impl IntoResponse, Error> {
    debug!("GET refresh handshake token");

    let grant = app_state.authenticator.refresh()?;

    Ok(Json(grant))
}

/// POST revoke a handshake token for the rest of its validity
///
/// Body: `{"token": "<issuedAtMillis>.<signature>"}`
pub async fn revoke(
    State(app_state): State<AppState>,
    Json(params): Json<RevokeParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST revoke handshake token");

    let revoked = app_state
        .authenticator
        .revoke(&params.token)
        .await
        .map_err(|e| match e.error_kind {
            ErrorKind::Token(TokenErrorKind::Malformed) => Error::BadRequest(e.reason().to_string()),
            _ => Error::from(e),
        })?;
    if revoked {
        info!("Handshake token revoked");
    }

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        Revocation { revoked },
    )))
}
