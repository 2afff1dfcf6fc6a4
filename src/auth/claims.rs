// Access token claim decoding

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};

use super::types::Claims;

/// Decode JWT claims without validating the signature
///
/// The client only reads its own token to learn the user and role; the
/// server remains the one that verifies it.
pub fn decode_claims(token: &str) -> Result<Claims> {
    let parts: Vec<&str> = token.split('.').collect();

    if parts.len() != 3 {
        anyhow::bail!("Invalid JWT format: expected 3 segments, got {}", parts.len());
    }

    // Some issuers pad the payload segment
    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .context("Failed to decode JWT payload")?;

    serde_json::from_slice(&payload).context("Failed to parse JWT claims")
}
