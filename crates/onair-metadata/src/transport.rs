//! Shared HTTP client for providers, refinement and artwork.

use std::time::Duration;

use onair_proto::config::MetadataConfig;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MetadataError, Result};

/// Client with the application user agent and the per-call timeout applied to
/// both connect and the whole request.
pub fn build_client(config: &MetadataConfig) -> Result<reqwest::Client> {
    let timeout = Duration::from_secs(config.http_timeout_secs);
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// GET `url` and decode the body as JSON.  Non-2xx is an error.
pub async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T> {
    let response = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await?;
    decode_json(response).await
}

/// POST `body` as JSON and decode the JSON reply.  Non-2xx is an error.
pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<T> {
    let response = client
        .post(url)
        .header(ACCEPT, "application/json")
        .json(body)
        .send()
        .await?;
    decode_json(response).await
}

pub(crate) async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(MetadataError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Trimmed, non-empty string or `None`.
pub(crate) fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
