//! Interactive login via OAuth authorization code + PKCE
//!
//! `/login` calls `authorization_url`, which parks a PKCE verifier under a
//! random state value. The provider redirects back to `/oauth/callback` with
//! that state, and `complete` consumes it exactly once to exchange the code.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use google_auth::{ClientSecrets, CredentialRecord};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Maximum age of a pending login before it expires.
const PENDING_EXPIRY: Duration = Duration::from_secs(600);

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("no pending login for this state")]
    UnknownState,

    #[error("pending login expired, start again at /login")]
    StateExpired,

    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("building authorization url: {0}")]
    AuthorizationUrl(google_auth::Error),

    #[error("exchanging authorization code: {0}")]
    Exchange(google_auth::Error),
}

struct PendingLogin {
    verifier: String,
    created_at: Instant,
}

pub struct OAuthFlow {
    client: reqwest::Client,
    secrets: ClientSecrets,
    redirect_uri: String,
    scopes: Vec<String>,
    expiry: Duration,
    pending: Mutex<HashMap<String, PendingLogin>>,
}

impl OAuthFlow {
    pub fn new(
        client: reqwest::Client,
        secrets: ClientSecrets,
        redirect_uri: String,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client,
            secrets,
            redirect_uri,
            scopes,
            expiry: PENDING_EXPIRY,
            pending: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Start a login: returns the provider URL to redirect the user to.
    pub async fn authorization_url(&self) -> Result<String, FlowError> {
        let verifier = google_auth::generate_verifier();
        let challenge = google_auth::compute_challenge(&verifier);
        let state = google_auth::generate_state();

        let url = google_auth::build_authorization_url(
            &self.secrets,
            &self.redirect_uri,
            &self.scopes,
            &state,
            &challenge,
        )
        .map_err(FlowError::AuthorizationUrl)?;

        let mut pending = self.pending.lock().await;
        // Lazy cleanup of abandoned logins
        pending.retain(|_, p| p.created_at.elapsed() < self.expiry);
        pending.insert(
            state,
            PendingLogin {
                verifier,
                created_at: Instant::now(),
            },
        );

        info!(pending = pending.len(), "login started");
        Ok(url)
    }

    /// Finish a login: exchange `code` for a credential record.
    ///
    /// The state is consumed whether or not the exchange succeeds.
    pub async fn complete(&self, code: &str, state: &str) -> Result<CredentialRecord, FlowError> {
        let login = self
            .pending
            .lock()
            .await
            .remove(state)
            .ok_or(FlowError::UnknownState)?;

        if login.created_at.elapsed() >= self.expiry {
            warn!("pending login expired");
            return Err(FlowError::StateExpired);
        }

        let token = google_auth::exchange_code(
            &self.client,
            &self.secrets,
            &self.redirect_uri,
            code,
            &login.verifier,
        )
        .await
        .map_err(FlowError::Exchange)?;

        Ok(CredentialRecord::from_exchange(
            token,
            &self.secrets,
            &self.scopes,
            Utc::now(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Form;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use tokio::net::TcpListener;

    /// Mock token endpoint accepting code `good-code` with a PKCE verifier.
    async fn start_token_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/token",
                axum::routing::post(|Form(form): Form<HashMap<String, String>>| async move {
                    let verifier_ok = form.get("code_verifier").is_some_and(|v| v.len() >= 43);
                    match form.get("code").map(String::as_str) {
                        Some("good-code") if verifier_ok => axum::Json(serde_json::json!({
                            "access_token": "at-new",
                            "refresh_token": "rt-new",
                            "expires_in": 3600,
                            "token_type": "Bearer",
                            "scope": "scope-a scope-b",
                        }))
                        .into_response(),
                        _ => (
                            StatusCode::BAD_REQUEST,
                            axum::Json(serde_json::json!({"error": "invalid_grant"})),
                        )
                            .into_response(),
                    }
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });

        url
    }

    fn flow(token_uri: &str) -> OAuthFlow {
        OAuthFlow::new(
            reqwest::Client::new(),
            ClientSecrets::new("client-id", "client-secret").with_token_uri(token_uri),
            "http://127.0.0.1:5000/oauth/callback".into(),
            vec!["scope-a".into(), "scope-b".into()],
        )
    }

    fn state_param(url: &str) -> String {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn authorization_url_carries_pkce_and_offline_access() {
        let flow = flow("http://127.0.0.1:1/token");
        let url = flow.authorization_url().await.unwrap();

        assert!(url.starts_with(google_auth::AUTHORIZE_ENDPOINT));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("client_id=client-id"));
        assert_eq!(flow.pending.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn complete_exchanges_code_into_record() {
        let token_uri = start_token_server().await;
        let flow = flow(&token_uri);
        let state = state_param(&flow.authorization_url().await.unwrap());

        let record = flow.complete("good-code", &state).await.unwrap();
        assert_eq!(record.access_token, "at-new");
        assert_eq!(record.refresh_token.as_deref(), Some("rt-new"));
        assert_eq!(record.client_id, "client-id");
        assert_eq!(record.token_uri, token_uri);
        assert_eq!(record.scopes, ["scope-a", "scope-b"]);
        assert!(record.expiry.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let token_uri = start_token_server().await;
        let flow = flow(&token_uri);
        let state = state_param(&flow.authorization_url().await.unwrap());

        flow.complete("good-code", &state).await.unwrap();
        assert!(matches!(
            flow.complete("good-code", &state).await,
            Err(FlowError::UnknownState)
        ));
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let flow = flow("http://127.0.0.1:1/token");
        assert!(matches!(
            flow.complete("good-code", "forged").await,
            Err(FlowError::UnknownState)
        ));
    }

    #[tokio::test]
    async fn expired_state_is_rejected() {
        let token_uri = start_token_server().await;
        let flow = flow(&token_uri).with_expiry(Duration::ZERO);
        let state = state_param(&flow.authorization_url().await.unwrap());

        assert!(matches!(
            flow.complete("good-code", &state).await,
            Err(FlowError::StateExpired)
        ));
    }

    #[tokio::test]
    async fn rejected_code_is_exchange_error() {
        let token_uri = start_token_server().await;
        let flow = flow(&token_uri);
        let state = state_param(&flow.authorization_url().await.unwrap());

        assert!(matches!(
            flow.complete("bad-code", &state).await,
            Err(FlowError::Exchange(_))
        ));
    }
}
