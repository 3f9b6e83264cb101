use serde::Deserialize;

/// Body of `POST /api/v1/token/revoke`.
#[derive(Debug, Deserialize)]
pub(crate) struct RevokeParams {
    pub(crate) token: String,
}
