use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub expires_in: String,
}

/// Fetch a fresh handshake token from `GET /api/v1/token/refresh`.
pub async fn fetch_token(client: &Client, base_url: &str) -> Result<TokenGrant> {
    let url = format!("{}/api/v1/token/refresh", base_url.trim_end_matches('/'));

    let response = client
        .get(&url)
        .send()
        .await
        .context("Failed to send token refresh request")?;

    if !response.status().is_success() {
        anyhow::bail!("Token refresh failed: {}", response.status());
    }

    response
        .json::<TokenGrant>()
        .await
        .context("Failed to parse token refresh response")
}

/// WebSocket endpoint for `base_url` (`http` -> `ws`, `https` -> `wss`), with
/// the token percent-encoded since base64 signatures carry `+`, `/` and `=`.
pub fn ws_url(base_url: &str, token: &str) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        anyhow::bail!("Base URL must start with http:// or https://, got {base_url}");
    };
    let url = Url::parse_with_params(&format!("{ws_base}/ws"), &[("token", token)])
        .with_context(|| format!("Invalid base URL {base_url}"))?;
    Ok(url.to_string())
}
