//! OAuth client secrets file loading
//!
//! Reads the JSON file downloaded from the Google Cloud console. The file has
//! a single top-level key, `installed` for desktop clients or `web` for web
//! application clients, wrapping the same set of fields.

use std::path::Path;

use common::Secret;
use serde::Deserialize;
use tracing::info;

use crate::constants::{AUTHORIZE_ENDPOINT, DEFAULT_REDIRECT_URI, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<RawClient>,
    web: Option<RawClient>,
}

#[derive(Deserialize)]
struct RawClient {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// OAuth client identity used for authorization, exchange and refresh.
#[derive(Debug, Clone)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_uris: Vec<String>,
}

impl ClientSecrets {
    /// Build client secrets directly, using Google's default endpoints.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
            auth_uri: AUTHORIZE_ENDPOINT.to_string(),
            token_uri: TOKEN_ENDPOINT.to_string(),
            redirect_uris: Vec::new(),
        }
    }

    /// Override the token endpoint (tests, non-Google providers).
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    /// First redirect URI registered for the client, or the broker's local
    /// callback when the file lists none.
    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .iter()
            .map(String::as_str)
            .find(|uri| !uri.trim().is_empty())
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    /// Load and parse a client secrets file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::ClientSecrets(format!("reading {}: {e}", path.display()))
        })?;
        let secrets = Self::from_json(&contents)?;
        info!(path = %path.display(), client_id = %secrets.client_id, "loaded OAuth client secrets");
        Ok(secrets)
    }

    /// Parse the contents of a client secrets file.
    pub fn from_json(contents: &str) -> Result<Self> {
        let file: SecretsFile = serde_json::from_str(contents)
            .map_err(|e| Error::ClientSecrets(format!("parsing client secrets: {e}")))?;

        let raw = file.installed.or(file.web).ok_or_else(|| {
            Error::ClientSecrets("expected an `installed` or `web` client section".into())
        })?;

        if raw.client_id.trim().is_empty() {
            return Err(Error::ClientSecrets("client_id is empty".into()));
        }

        Ok(Self {
            client_id: raw.client_id,
            client_secret: Secret::new(raw.client_secret),
            auth_uri: raw.auth_uri.unwrap_or_else(|| AUTHORIZE_ENDPOINT.to_string()),
            token_uri: raw.token_uri.unwrap_or_else(|| TOKEN_ENDPOINT.to_string()),
            redirect_uris: raw.redirect_uris,
        })
    }
}
