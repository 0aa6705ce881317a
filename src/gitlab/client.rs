//! Cached GitLab API client
//!
//! Fetches single objects and complete paginated listings from the GitLab REST
//! API. Every result is cached under the request's base query, so repeated
//! lookups inside the TTL window cost no upstream requests.

use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue, LINK};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::flight::InFlight;
use super::pagination::{next_link, with_page_size};
use crate::cache::Cache;

/// Default GitLab API root
pub const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";

/// Page size requested for listings (GitLab's maximum)
pub const PER_PAGE: u32 = 100;

/// Errors that can occur when fetching from the GitLab API
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// GitLab answered with a non-success status
    #[error("GitLab returned {status} for {url}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    Parse(#[from] serde_json::Error),

    /// The API root is not an absolute http(s) URL
    #[error("Invalid GitLab API URL: {0}")]
    InvalidUrl(String),

    /// The access token cannot be sent as a header
    #[error("Access token contains characters not allowed in an HTTP header")]
    InvalidToken,
}

/// Client for the GitLab REST API with a shared response cache
#[derive(Clone)]
pub struct GitLabClient {
    /// HTTP client for making requests
    http_client: Client,
    /// API root that relative queries are resolved against
    base_url: String,
    /// Cache shared by every fetch
    cache: Cache,
    /// Keys with an upstream fetch in progress
    in_flight: InFlight,
}

impl GitLabClient {
    /// Creates a client for `base_url`, authenticating with `token` if given
    ///
    /// The token is sent as the `PRIVATE-TOKEN` header and is otherwise opaque.
    pub fn new(base_url: &str, token: Option<&str>, cache: Cache) -> Result<Self, FetchError> {
        match reqwest::Url::parse(base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(FetchError::InvalidUrl(base_url.to_string())),
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(token).map_err(|_| FetchError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert("PRIVATE-TOKEN", value);
        }

        let http_client = Client::builder()
            .user_agent(concat!("codeforce/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self::with_client(http_client, base_url, cache))
    }

    /// Creates a client with a custom HTTP client
    pub fn with_client(http_client: Client, base_url: &str, cache: Cache) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
            in_flight: InFlight::default(),
        }
    }

    /// The cache this client reads and writes
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Fetches a single object, consulting the cache first
    ///
    /// # Arguments
    /// * `key` - Request path relative to the API root (also the cache key)
    /// * `force_refresh` - Skip the cache lookup and always hit the API
    ///
    /// # Returns
    /// * `Ok(T)` - The cached or freshly fetched object
    /// * `Err(FetchError)` - If the request fails; nothing is cached
    pub async fn fetch_one<T: DeserializeOwned>(
        &self,
        key: &str,
        force_refresh: bool,
    ) -> Result<T, FetchError> {
        self.cached_or_fetch(key, force_refresh, || async move {
            let response = self.get(&self.resolve_url(key)).await?;
            let text = response.text().await?;
            Ok(serde_json::from_str::<Value>(&text)?)
        })
        .await
    }

    /// Fetches every page of a listing, consulting the cache first
    ///
    /// Pages are requested with `per_page=100` and followed through the `link`
    /// header's `next` relation until none remains. The concatenated items are
    /// cached as one value under `base_query`.
    ///
    /// # Arguments
    /// * `base_query` - Listing path and filters without paging parameters
    /// * `force_refresh` - Skip the cache lookup and always walk all pages
    ///
    /// # Returns
    /// * `Ok(Vec<T>)` - All items in upstream order
    /// * `Err(FetchError)` - If any page fails; no partial result is cached
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        base_query: &str,
        force_refresh: bool,
    ) -> Result<Vec<T>, FetchError> {
        self.cached_or_fetch(base_query, force_refresh, || self.walk_pages(base_query))
            .await
    }

    /// Cache-aside lookup shared by both fetchers
    ///
    /// Concurrent misses for one key are coalesced: later callers wait for the
    /// first and then re-read the cache.
    async fn cached_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        force_refresh: bool,
        fetch: F,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>>,
    {
        if !force_refresh {
            if let Some(cached) = self.cache.get::<T>(key) {
                debug!(key, "cache hit");
                return Ok(cached);
            }
        }

        let ticket = self.in_flight.join(key);
        let _turn = ticket.turn().await;

        if !force_refresh {
            if let Some(cached) = self.cache.get::<T>(key) {
                debug!(key, "cache filled by concurrent fetch");
                return Ok(cached);
            }
        }

        debug!(key, force_refresh, "cache miss, fetching from GitLab");
        let value = fetch().await?;
        // Only values the caller can read are cached
        let data = T::deserialize(&value)?;
        self.cache.set(key, &value);
        Ok(data)
    }

    /// Requests every page of a listing and concatenates the items
    async fn walk_pages(&self, base_query: &str) -> Result<Value, FetchError> {
        let mut items: Vec<Value> = Vec::new();
        let mut next = Some(self.resolve_url(&with_page_size(base_query, PER_PAGE)));
        let mut page = 1;

        while let Some(url) = next.take() {
            debug!(%url, page, "fetching page");
            let response = self.get(&url).await?;

            next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_link)
                .map(|target| self.resolve_url(&target));

            let text = response.text().await?;
            let page_items: Vec<Value> = serde_json::from_str(&text)?;
            items.extend(page_items);
            page += 1;
        }

        debug!(base_query, items = items.len(), pages = page - 1, "fetched all pages");
        Ok(Value::Array(items))
    }

    /// Absolute URLs are used verbatim; anything else is relative to the API root
    fn resolve_url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }

    /// Sends a GET request and turns non-success statuses into errors
    async fn get(&self, url: &str) -> Result<Response, FetchError> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(FetchError::Status {
            status,
            url: url.to_string(),
            body,
        })
    }
}
