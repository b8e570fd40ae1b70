//! Collected documents and their pre-filter outcome

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::parameters::FilterThresholds;

/// Maximum key topics kept on a scoring result
pub const MAX_KEY_TOPICS: usize = 5;

/// SHA-256 hex digest of title and body
pub fn content_hash(title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Externally sourced content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable id: URL hash, or content hash when the URL is empty
    pub source_id: String,
    /// Origin, e.g. the search engine that returned it
    pub source_type: String,
    pub title: String,
    pub body: String,
    pub url: String,
    /// Query that surfaced this document
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub prefilter: Option<PreFilterResult>,
}

impl Document {
    pub fn new(
        source_type: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let body = body.into();
        let url = url.into();
        let digest = if url.trim().is_empty() {
            content_hash(&title, &body)
        } else {
            url_hash(&url)
        };

        Self {
            source_id: digest[..16].to_string(),
            source_type: source_type.into(),
            title,
            body,
            url,
            query: None,
            prefilter: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.title, &self.body)
    }

    /// Title and body joined for scoring
    pub fn scoring_text(&self) -> String {
        if self.title.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }
}

/// Which scorer produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    Service,
    Heuristic,
}

/// Pre-filter scoring outcome for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreFilterResult {
    pub source_id: String,
    pub content_hash: String,
    pub relevance: f64,
    pub quality: f64,
    pub importance: f64,
    pub category: String,
    pub key_topics: Vec<String>,
    pub confidence: f64,
    pub combined_score: f64,
    pub should_proceed: bool,
    pub reason: String,
    /// Cost in dollars (zero for cache hits and heuristic results)
    pub cost: f64,
    pub scorer: ScorerKind,
    #[serde(default)]
    pub cache_hit: bool,
}

impl PreFilterResult {
    /// Build a result with normalized scores and a fresh decision
    #[allow(clippy::too_many_arguments)]
    pub fn scored(
        source_id: String,
        content_hash: String,
        relevance: f64,
        quality: f64,
        importance: f64,
        confidence: f64,
        category: String,
        mut key_topics: Vec<String>,
        reason: String,
        cost: f64,
        scorer: ScorerKind,
        thresholds: &FilterThresholds,
    ) -> Self {
        let relevance = normalize_score(relevance);
        let quality = normalize_score(quality);
        let importance = normalize_score(importance);
        let confidence = normalize_score(confidence);
        key_topics.retain(|t| !t.trim().is_empty());
        key_topics.truncate(MAX_KEY_TOPICS);

        Self {
            source_id,
            content_hash,
            relevance,
            quality,
            importance,
            category: if category.trim().is_empty() {
                "general".to_string()
            } else {
                category
            },
            key_topics,
            confidence,
            combined_score: thresholds.combined_score(relevance, quality, importance),
            should_proceed: thresholds.should_proceed(relevance, quality, importance, confidence),
            reason,
            cost: if cost.is_finite() { cost.max(0.0) } else { 0.0 },
            scorer,
            cache_hit: false,
        }
    }

    /// Recompute the decision from this result's own scores
    pub fn decision_under(&self, thresholds: &FilterThresholds) -> bool {
        thresholds.should_proceed(self.relevance, self.quality, self.importance, self.confidence)
    }
}

/// Clamp into [0, 1]; scores reported on a 0-10 or 0-100 scale are rescaled
pub fn normalize_score(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    let scaled = if value <= 1.0 {
        value
    } else if value <= 10.0 {
        value / 10.0
    } else {
        value / 100.0
    };
    scaled.clamp(0.0, 1.0)
}
