//! OAuth token endpoint exchange and refresh
//!
//! Both operations POST a form to the token endpoint with different grant
//! types. The endpoint URL comes from the client secrets (exchange) or from
//! the stored credential (refresh), never from a hard-coded constant.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client_secrets::ClientSecrets;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// Refresh responses usually omit `refresh_token`; the caller keeps the one
/// it already has unless the provider rotates it.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Space-separated scopes actually granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Granted scopes, if the provider reported them.
    pub fn granted_scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
    }
}

/// Exchange an authorization code for tokens (login callback).
///
/// Sends the PKCE verifier to prove this process started the flow.
pub async fn exchange_code(
    client: &reqwest::Client,
    secrets: &ClientSecrets,
    redirect_uri: &str,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&secrets.token_uri)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.expose().as_str()),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    debug!("authorization code exchanged");
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("invalid token response: {e}")))
}

/// Refresh an access token using a refresh token.
///
/// One request, no retries. 400/401/403 mean the grant itself is unusable
/// (Google answers `invalid_grant` with 400) and map to `InvalidCredentials`.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_uri: &str,
    client_id: &str,
    client_secret: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(token_uri)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("invalid refresh response: {e}")))
}
