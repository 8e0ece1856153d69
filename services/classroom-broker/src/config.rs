//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `.env` is loaded into the environment before any of this runs, so
//! `DATABASE_URL`, `DB_NAME` and `LISTEN_ADDR` may come from there too.
//! The OAuth client secret lives in the client secrets file, never in TOML.

use classroom_api::ApiSettings;
use google_auth::ClientSecrets;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Used when neither `--config` nor `CONFIG_PATH` is given. May be absent.
pub const DEFAULT_CONFIG_PATH: &str = "classroom-broker.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Durable credential slot. Both fields are required, from TOML or env.
#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// `sqlite:<path>` or `file:<dir>`; `DATABASE_URL` overrides.
    #[serde(default)]
    pub url: Option<String>,
    /// Namespace for the slot; `DB_NAME` overrides.
    #[serde(default)]
    pub database: Option<String>,
}

/// OAuth client and login flow settings
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_client_secrets_file")]
    pub client_secrets_file: PathBuf,
    /// Falls back to the client secrets file's first `redirect_uris` entry.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

/// Upstream API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_secrets_file: default_client_secrets_file(),
            redirect_uri: None,
            scopes: default_scopes(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            collection: default_collection(),
            timeout_secs: default_api_timeout(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_max_connections() -> usize {
    1000
}

fn default_client_secrets_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_scopes() -> Vec<String> {
    google_auth::DEFAULT_SCOPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_refresh_timeout() -> u64 {
    30
}

fn default_base_url() -> String {
    classroom_api::proxy::DEFAULT_BASE_URL.to_string()
}

fn default_collection() -> String {
    classroom_api::proxy::DEFAULT_COLLECTION.to_string()
}

fn default_api_timeout() -> u64 {
    30
}

fn default_max_pages() -> u32 {
    classroom_api::proxy::DEFAULT_MAX_PAGES
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// A missing file is only tolerated at the default path; an explicitly
    /// named config file must exist.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    && path == Path::new(DEFAULT_CONFIG_PATH) =>
            {
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(url) = non_empty_env("DATABASE_URL") {
            self.store.url = Some(url);
        }
        if let Some(name) = non_empty_env("DB_NAME") {
            self.store.database = Some(name);
        }
        // Unparseable LISTEN_ADDR is reported by validate
        if let Some(Ok(addr)) = non_empty_env("LISTEN_ADDR").map(|a| a.parse()) {
            self.server.listen_addr = addr;
        }
    }

    fn validate(&self) -> common::Result<()> {
        if let Some(addr) = non_empty_env("LISTEN_ADDR") {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(common::Error::Config(format!(
                    "LISTEN_ADDR is not a socket address: {addr}"
                )));
            }
        }

        let url = self.store_url()?;
        if !url.starts_with("sqlite:") && !url.starts_with("file:") {
            return Err(common::Error::Config(format!(
                "store url must start with sqlite: or file:, got: {url}"
            )));
        }
        self.store_database()?;

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.oauth.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api timeout_secs must be greater than 0".into(),
            ));
        }
        if self.api.max_pages == 0 {
            return Err(common::Error::Config(
                "max_pages must be greater than 0".into(),
            ));
        }
        if self.api.collection.trim().is_empty() {
            return Err(common::Error::Config("api collection is empty".into()));
        }
        self.api_settings()?;
        Ok(())
    }

    pub fn store_url(&self) -> common::Result<&str> {
        self.store
            .url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(common::Error::MissingSetting("store.url (DATABASE_URL)"))
    }

    pub fn store_database(&self) -> common::Result<&str> {
        self.store
            .database
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(common::Error::MissingSetting("store.database (DB_NAME)"))
    }

    /// Redirect URI for the login flow: configured value, else the one
    /// registered in the client secrets file.
    pub fn redirect_uri(&self, secrets: &ClientSecrets) -> String {
        match self.oauth.redirect_uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => uri.to_string(),
            _ => secrets.redirect_uri().to_string(),
        }
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth.refresh_timeout_secs)
    }

    /// Upstream API settings with the base URL parsed.
    pub fn api_settings(&self) -> common::Result<ApiSettings> {
        let base_url = Url::parse(&self.api.base_url).map_err(|e| {
            common::Error::Config(format!("invalid api base_url {}: {e}", self.api.base_url))
        })?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(common::Error::Config(format!(
                "api base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        let mut settings = ApiSettings::new(base_url);
        settings.collection = self.api.collection.clone();
        settings.timeout = Duration::from_secs(self.api.timeout_secs);
        settings.max_pages = self.api.max_pages;
        Ok(settings)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
