// Token refresh and login calls

use reqwest::Client;

use crate::error::RefreshError;

use super::types::{CredentialSet, LoginRequest, RefreshRequest, Scope, TokenEnvelope};

/// Build an auth endpoint URL for a scope
fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// POST a JSON body to an auth endpoint and decode the token envelope
async fn post_for_tokens<B: serde::Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
) -> Result<TokenEnvelope, RefreshError> {
    let response = client.post(url).json(body).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RefreshError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(TokenEnvelope::default());
    }

    serde_json::from_slice(&bytes).map_err(|e| RefreshError::Decode(e.to_string()))
}

/// Exchange a refresh token for a new access token
pub async fn refresh_access_token(
    client: &Client,
    base_url: &str,
    scope: Scope,
    refresh_token: &str,
) -> Result<String, RefreshError> {
    let url = endpoint_url(base_url, scope.refresh_path());
    tracing::info!(scope = %scope, url = %url, "Refreshing access token...");

    let envelope = post_for_tokens(client, &url, &RefreshRequest { refresh_token }).await?;

    let access_token = envelope
        .access_token()
        .ok_or(RefreshError::MissingAccessToken)?
        .to_string();

    let token_prefix: String = access_token.chars().take(8).collect();
    tracing::info!(scope = %scope, token_prefix = %token_prefix, "Access token refreshed");

    Ok(access_token)
}

/// Log in and return the credential set to store
pub async fn login(
    client: &Client,
    base_url: &str,
    scope: Scope,
    email: &str,
    password: &str,
) -> Result<CredentialSet, RefreshError> {
    let url = endpoint_url(base_url, scope.login_path());
    tracing::info!(scope = %scope, url = %url, "Logging in...");

    let envelope = post_for_tokens(client, &url, &LoginRequest { email, password }).await?;

    let access_token = envelope
        .access_token()
        .ok_or(RefreshError::MissingAccessToken)?;
    let refresh_token = envelope
        .refresh_token()
        .ok_or(RefreshError::MissingRefreshToken)?;

    Ok(CredentialSet::new(access_token, refresh_token))
}
