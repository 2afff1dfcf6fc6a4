// Token refresh logic

use anyhow::{Context, Result};
use reqwest::Client;

use super::types::{RefreshRequest, RefreshResponse};

/// Build the refresh endpoint URL for an API base
pub fn refresh_url(base_url: &str) -> String {
    format!("{}/auth/refresh", base_url.trim_end_matches('/'))
}

/// Exchange a refresh token for a new access token
///
/// Sent on the manager's own client so the call never passes through the
/// request pipeline and cannot recurse into another refresh.
pub async fn refresh_access_token(
    client: &Client,
    url: &str,
    refresh_token: &str,
) -> Result<RefreshResponse> {
    tracing::info!("Refreshing access token...");

    let response = client
        .post(url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .context("Failed to send refresh request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh rejected"
        );
        anyhow::bail!("Token refresh failed: {} - {}", status, error_text);
    }

    let data: RefreshResponse = response
        .json()
        .await
        .context("Failed to parse refresh response")?;

    if data.access_token.is_empty() {
        anyhow::bail!("Refresh response does not contain access_token");
    }

    tracing::info!(
        rotated = data.refresh_token.is_some(),
        "Access token refreshed"
    );

    Ok(data)
}
