//! Search provider seam
//!
//! Collection issues queries through [`SearchProvider`]. The bundled
//! [`HttpSearchProvider`] talks to a generic JSON search endpoint:
//!
//! `GET {base_url}/search?q=<query>&max_results=<n>` returning
//! `{"results": [{"title", "url", "body"}], "engine": "...", "quota_remaining": n}`

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use sage_common::config::{ProviderEndpoint, SEARCH_API_KEY_ENV};

/// One candidate document returned by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub body: String,
}

/// Result of a single query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    pub engine_used: String,
    #[serde(default)]
    pub quota_remaining: Option<u64>,
}

/// Search provider errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error {0}: {1}")]
    Provider(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Search provider not configured")]
    NotConfigured,
}

impl SearchError {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, SearchError::QuotaExhausted(_))
    }
}

/// External search collaborator
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchOutcome, SearchError>;
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    quota_remaining: Option<u64>,
}

/// Search provider backed by a JSON HTTP endpoint
pub struct HttpSearchProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpSearchProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Build from the `[search]` config section; `None` when no base URL is set
    pub fn from_config(endpoint: &ProviderEndpoint) -> Result<Option<Self>, SearchError> {
        let Some(base_url) = endpoint.base_url.as_deref() else {
            return Ok(None);
        };
        Self::new(
            base_url,
            endpoint.resolve_api_key(SEARCH_API_KEY_ENV),
            endpoint.requests_per_second,
            Duration::from_secs(endpoint.timeout_secs),
        )
        .map(Some)
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchOutcome, SearchError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/search", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("q", query), ("max_results", &max_results.to_string())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(query, max_results, "Issuing search query");

        let response = request
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::QuotaExhausted(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Provider(status.as_u16(), body));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;

        let mut results = wire.results;
        results.truncate(max_results);

        Ok(SearchOutcome {
            results,
            engine_used: wire.engine.unwrap_or_else(|| "http".to_string()),
            quota_remaining: wire.quota_remaining,
        })
    }
}

/// Stand-in used when no search endpoint is configured; every query fails
pub struct UnconfiguredSearchProvider;

#[async_trait]
impl SearchProvider for UnconfiguredSearchProvider {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<SearchOutcome, SearchError> {
        Err(SearchError::NotConfigured)
    }
}
