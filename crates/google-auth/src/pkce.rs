//! PKCE (RFC 7636) and authorization URL construction
//!
//! The verifier stays server-side until the callback exchanges the code; the
//! S256 challenge goes out in the authorization URL. The `state` value ties
//! the callback to the pending login it belongs to.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::client_secrets::ClientSecrets;
use crate::error::{Error, Result};

/// Generate a random PKCE code verifier.
///
/// 64 random bytes encode to 86 URL-safe base64 characters, inside the
/// 43-128 range RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate an opaque CSRF `state` value for one login attempt.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the provider authorization URL.
///
/// Requests offline access with a forced consent prompt so the provider
/// issues a refresh token even when the user approved the client before.
pub fn build_authorization_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    challenge: &str,
) -> Result<String> {
    let scope = scopes.join(" ");
    let url = Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| Error::ClientSecrets(format!("invalid auth_uri {}: {e}", secrets.auth_uri)))?;

    Ok(url.into())
}
