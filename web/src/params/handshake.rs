use serde::Deserialize;

/// Query string of the WebSocket upgrade request, `/ws?token=<token>`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct HandshakeParams {
    pub(crate) token: Option<String>,
}
