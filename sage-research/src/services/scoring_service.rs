//! Scoring service seam
//!
//! Both pre-filter and deep analysis score documents through
//! [`ScoringService`]. The two modes differ only in the request's `mode`;
//! a real backend charges far less for [`ScoringMode::PreFilter`].
//!
//! [`HttpScoringService`] posts the request as JSON to `{base_url}/score`
//! and expects a [`ScoreResponse`] body. HTTP 429 maps to
//! [`ScoringError::RateLimited`], honoring a `Retry-After` header.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use sage_common::config::{ProviderEndpoint, SCORING_API_KEY_ENV};

use crate::utils::Retryable;

/// Which tier of the pipeline is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Cheap first-pass scoring
    PreFilter,
    /// Expensive full analysis
    Deep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub text: String,
    pub topic: String,
    pub categories: Vec<String>,
    pub mode: ScoringMode,
}

/// Raw service answer; scores may arrive on any scale and are normalized by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    #[serde(default)]
    pub relevance: f64,
    #[serde(default)]
    pub quality: f64,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    /// Short summary, filled in deep mode
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tokens: u64,
    /// Cost of this call in dollars
    #[serde(default)]
    pub cost: f64,
}

/// Scoring service errors
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Rate limited by scoring service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Scoring service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid scoring response: {0}")]
    InvalidResponse(String),

    #[error("Scoring service error {0}: {1}")]
    Service(u16, String),

    #[error("Scoring service not configured")]
    NotConfigured,
}

impl ScoringError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ScoringError::RateLimited { .. })
    }
}

impl Retryable for ScoringError {
    /// Rate limits and transport failures; malformed or rejected requests are not
    fn is_retryable(&self) -> bool {
        matches!(self, ScoringError::RateLimited { .. } | ScoringError::Unavailable(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ScoringError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// External scoring collaborator
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse, ScoringError>;
}

/// Scoring service backed by a JSON HTTP endpoint
pub struct HttpScoringService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpScoringService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, ScoringError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ScoringError::Unavailable(e.to_string()))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Build from the `[scoring]` config section; `None` when no base URL is set
    pub fn from_config(endpoint: &ProviderEndpoint) -> Result<Option<Self>, ScoringError> {
        let Some(base_url) = endpoint.base_url.as_deref() else {
            return Ok(None);
        };
        Self::new(
            base_url,
            endpoint.resolve_api_key(SCORING_API_KEY_ENV),
            endpoint.requests_per_second,
            Duration::from_secs(endpoint.timeout_secs),
        )
        .map(Some)
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ScoringService for HttpScoringService {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse, ScoringError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/score", self.base_url);
        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ScoringError::Unavailable(format!("timeout: {}", e))
            } else {
                ScoringError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
            return Err(ScoringError::RateLimited { retry_after });
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(ScoringError::Unavailable(status.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoringError::Service(status.as_u16(), body));
        }

        response
            .json::<ScoreResponse>()
            .await
            .map_err(|e| ScoringError::InvalidResponse(e.to_string()))
    }
}

/// Stand-in used when no scoring endpoint is configured
///
/// Pre-filter falls back to heuristics; deep analysis records a per-document failure.
pub struct UnconfiguredScoringService;

#[async_trait]
impl ScoringService for UnconfiguredScoringService {
    async fn score(&self, _request: &ScoreRequest) -> Result<ScoreResponse, ScoringError> {
        Err(ScoringError::NotConfigured)
    }
}
