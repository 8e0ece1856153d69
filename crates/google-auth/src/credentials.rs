//! The persisted credential record
//!
//! A `CredentialRecord` is everything needed to call the API on the user's
//! behalf and to refresh the access token later. Its JSON form is the blob
//! stored by the credential store; `token` is accepted as an alias for
//! `access_token` so records written by Google's own client libraries load.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::client_secrets::ClientSecrets;
use crate::constants::{DEFAULT_TOKEN_TYPE, TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::token::TokenResponse;

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

fn default_token_uri() -> String {
    TOKEN_ENDPOINT.to_string()
}

/// A single OAuth credential.
///
/// `expiry` is absolute UTC. `None` means the provider gave no lifetime and
/// the token is treated as non-expiring.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(alias = "token", default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl CredentialRecord {
    /// Build a record from a completed authorization-code exchange.
    ///
    /// Falls back to the requested scopes when the provider does not echo
    /// the granted ones.
    pub fn from_exchange(
        token: TokenResponse,
        secrets: &ClientSecrets,
        requested_scopes: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let scopes = token
            .granted_scopes()
            .unwrap_or_else(|| requested_scopes.to_vec());
        Self {
            expiry: expiry_from(token.expires_in, now),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type.unwrap_or_else(default_token_type),
            scopes,
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.expose().clone(),
            token_uri: secrets.token_uri.clone(),
        }
    }

    /// Apply a refresh response, keeping the refresh token unless rotated.
    pub fn refreshed(&self, token: TokenResponse, now: DateTime<Utc>) -> Self {
        let scopes = token.granted_scopes().unwrap_or_else(|| self.scopes.clone());
        Self {
            expiry: expiry_from(token.expires_in, now),
            access_token: token.access_token,
            refresh_token: token.refresh_token.or_else(|| self.refresh_token.clone()),
            token_type: token.token_type.unwrap_or_else(|| self.token_type.clone()),
            scopes,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            token_uri: self.token_uri.clone(),
        }
    }

    /// Whether `now` is at or past the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }

    /// The refresh token, if present and non-empty.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Whether the fields needed to use or refresh the credential are present.
    pub fn is_well_formed(&self) -> bool {
        !self.access_token.trim().is_empty()
            && !self.client_id.trim().is_empty()
            && !self.token_uri.trim().is_empty()
    }

    /// Whether every required scope was granted.
    pub fn covers_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }

    /// `Authorization` header value for API calls.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::CredentialParse(format!("parsing credential: {e}")))
    }
}

fn expiry_from(expires_in: Option<u64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    expires_in
        .and_then(|secs| i64::try_from(secs).ok())
        .map(|secs| now + Duration::seconds(secs))
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Where a credential entering the lifecycle manager comes from.
#[derive(Debug, Clone)]
pub enum CredentialInput {
    /// A record already in memory (fresh from the OAuth exchange).
    FromRecord(CredentialRecord),
    /// The serialized JSON blob as persisted by the store.
    FromSerializedForm(String),
}

impl CredentialInput {
    /// Normalize to a record. A blob that does not parse is malformed.
    pub fn into_record(self) -> Result<CredentialRecord> {
        match self {
            CredentialInput::FromRecord(record) => Ok(record),
            CredentialInput::FromSerializedForm(json) => CredentialRecord::from_json(&json),
        }
    }
}

impl From<CredentialRecord> for CredentialInput {
    fn from(record: CredentialRecord) -> Self {
        CredentialInput::FromRecord(record)
    }
}
