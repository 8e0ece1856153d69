//! Upstream API calls with a managed credential

use std::sync::Arc;
use std::time::Duration;

use credential_lifecycle::CredentialLifecycleManager;
use google_auth::CredentialRecord;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{Item, ProxyError, Result};

pub const DEFAULT_BASE_URL: &str = "https://classroom.googleapis.com/v1";
pub const DEFAULT_COLLECTION: &str = "courses";
pub const DEFAULT_MAX_PAGES: u32 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how to reach the upstream API.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    /// Resource path under `base_url`; also the item array key in list pages.
    pub collection: String,
    pub timeout: Duration,
    /// Upper bound on list pages fetched per call.
    pub max_pages: u32,
}

impl ApiSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            collection: DEFAULT_COLLECTION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

pub struct ApiProxy {
    client: reqwest::Client,
    manager: Arc<CredentialLifecycleManager>,
    settings: ApiSettings,
}

impl ApiProxy {
    pub fn new(
        client: reqwest::Client,
        manager: Arc<CredentialLifecycleManager>,
        settings: ApiSettings,
    ) -> Self {
        Self {
            client,
            manager,
            settings,
        }
    }

    /// Fetch a single item by id.
    ///
    /// The upstream answers 400 for ids it cannot parse and 404 for unknown
    /// ones; both are `NotFound` here. A blank id is `NotFound` without an
    /// upstream request, but only once the credential has been validated.
    #[instrument(skip(self))]
    pub async fn get_item(&self, id: &str) -> Result<Item> {
        let credential = self.manager.ensure_valid(None).await?;
        if id.trim().is_empty() {
            return Err(ProxyError::NotFound(id.to_string()));
        }
        let url = self.endpoint(Some(id))?;

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, credential.authorization_header())
            .timeout(self.settings.timeout)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            debug!(%status, "item not found upstream");
            return Err(ProxyError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Api(format!("{status}: {body}")));
        }

        response
            .json::<Item>()
            .await
            .map_err(|e| ProxyError::Api(format!("decoding item: {e}")))
    }

    /// Fetch every item in the collection, following `nextPageToken`.
    ///
    /// Stops after `max_pages` pages and returns what it has.
    #[instrument(skip(self))]
    pub async fn list_items(&self) -> Result<Vec<Item>> {
        let credential = self.manager.ensure_valid(None).await?;
        let url = self.endpoint(None)?;

        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 1..=self.settings.max_pages {
            let body = self.fetch_page(&url, &credential, page_token.as_deref()).await?;

            if let Some(values) = body.get(&self.settings.collection) {
                let page_items: Vec<Item> = serde_json::from_value(values.clone())
                    .map_err(|e| ProxyError::Api(format!("decoding page {page}: {e}")))?;
                items.extend(page_items);
            }

            page_token = body
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            if page_token.is_none() {
                debug!(pages = page, count = items.len(), "listed items");
                return Ok(items);
            }
        }

        warn!(
            max_pages = self.settings.max_pages,
            count = items.len(),
            "page limit reached, returning partial list"
        );
        Ok(items)
    }

    async fn fetch_page(
        &self,
        url: &Url,
        credential: &CredentialRecord,
        page_token: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, credential.authorization_header())
            .timeout(self.settings.timeout);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Api(format!("{status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| ProxyError::Api(format!("decoding page: {e}")))
    }

    /// `{base_url}/{collection}` or `{base_url}/{collection}/{id}`, with the
    /// id percent-encoded as one path segment.
    fn endpoint(&self, id: Option<&str>) -> Result<Url> {
        let mut url = self.settings.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ProxyError::Api("base url cannot carry a path".into()))?;
            segments.pop_if_empty().push(&self.settings.collection);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }
}

fn request_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::Api(format!("upstream timed out: {e}"))
    } else {
        ProxyError::Api(format!("upstream request failed: {e}"))
    }
}
