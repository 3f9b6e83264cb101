use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use auth::error::{ErrorKind as AuthErrorKind, TokenErrorKind};
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Handshake or token operation refused by the authenticator.
    Auth(auth::Error),
    /// Upstream log, DLQ or delayed store failure.
    Stream(stream::Error),
    /// Fan-out to live connections failed.
    Delivery(events::DeliveryError),
    /// The request itself is unusable.
    BadRequest(String),
}

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        match self {
            Error::Auth(e) => write!(fmt, "{e}"),
            Error::Stream(e) => write!(fmt, "{e}"),
            Error::Delivery(e) => write!(fmt, "{e}"),
            Error::BadRequest(reason) => write!(fmt, "Bad request: {reason}"),
        }
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Auth(e) => match e.error_kind {
                AuthErrorKind::Token(TokenErrorKind::InvalidKey) => {
                    error!("Token signing failed: {e}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
                _ => (StatusCode::FORBIDDEN, e.reason()).into_response(),
            },
            Error::Stream(e) => {
                error!("Stream operation failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
            Error::Delivery(e) => {
                warn!("Broadcast failed: {e}");
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE UNAVAILABLE").into_response()
            }
            Error::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
        }
    }
}

impl From<auth::Error> for Error {
    fn from(err: auth::Error) -> Self {
        Self::Auth(err)
    }
}

impl From<stream::Error> for Error {
    fn from(err: stream::Error) -> Self {
        Self::Stream(err)
    }
}

impl From<events::DeliveryError> for Error {
    fn from(err: events::DeliveryError) -> Self {
        Self::Delivery(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::error::{blacklist_error, token_error, BlacklistErrorKind};

    #[test]
    fn test_handshake_rejections_are_forbidden() {
        let expired = Error::from(token_error(TokenErrorKind::Expired, "old"));
        let store_down = Error::from(blacklist_error(BlacklistErrorKind::Unavailable, "down"));

        assert_eq!(expired.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(store_down.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_signing_failure_is_internal() {
        let error = Error::from(token_error(TokenErrorKind::InvalidKey, "bad key"));

        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_saturated_broadcast_is_unavailable() {
        let error = Error::from(events::DeliveryError {
            topic: "broadcast".to_string(),
            kind: events::DeliveryErrorKind::Saturated {
                failed: 1,
                delivered: 0,
            },
        });

        assert_eq!(error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_bad_request_keeps_reason() {
        let error = Error::BadRequest("count must be positive".to_string());

        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
