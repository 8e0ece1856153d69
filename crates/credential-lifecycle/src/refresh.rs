//! Token refresh exchange
//!
//! One POST to the credential's own token endpoint per call, bounded by a
//! timeout. Retry policy belongs to the caller; nothing here loops.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use google_auth::CredentialRecord;
use tracing::{debug, info, warn};

use crate::error::RefreshError;

/// Turns an expired-but-refreshable credential into a fresh one.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<CredentialRecord, RefreshError>> + Send + 'a>>;
}

/// Refresher that talks to the OAuth token endpoint.
pub struct OAuthRefresher {
    client: reqwest::Client,
    timeout: Duration,
}

impl OAuthRefresher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn exchange(&self, record: &CredentialRecord) -> Result<CredentialRecord, RefreshError> {
        let refresh = record
            .usable_refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;

        debug!(token_uri = %record.token_uri, "refreshing access token");

        let response = tokio::time::timeout(
            self.timeout,
            google_auth::refresh_token(
                &self.client,
                &record.token_uri,
                &record.client_id,
                &record.client_secret,
                refresh,
            ),
        )
        .await
        .map_err(|_| RefreshError::Timeout(self.timeout))??;

        Ok(record.refreshed(response, Utc::now()))
    }
}

impl TokenRefresher for OAuthRefresher {
    fn refresh<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<CredentialRecord, RefreshError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.exchange(record).await;
            match &result {
                Ok(refreshed) => {
                    metrics::counter!("credential_refresh_total", "outcome" => "success")
                        .increment(1);
                    info!(expiry = ?refreshed.expiry, "access token refreshed");
                }
                Err(e) => {
                    metrics::counter!("credential_refresh_total", "outcome" => e.label())
                        .increment(1);
                    warn!(error = %e, "access token refresh failed");
                }
            }
            result
        })
    }
}
