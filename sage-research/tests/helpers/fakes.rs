//! Scripted collaborators and an in-memory session store

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use sage_common::Result;
use sage_research::models::Session;
use sage_research::services::{
    ScoreRequest, ScoreResponse, ScoringError, ScoringMode, ScoringService, SearchError, SearchHit,
    SearchOutcome, SearchProvider,
};
use sage_research::store::{PhaseKey, SessionFile, SessionStore};

/// Search provider returning `per_query` distinct hits per query
pub struct FakeSearch {
    per_query: usize,
    delay: Duration,
    quota_exhausted_on: HashSet<usize>,
    calls: AtomicUsize,
}

impl FakeSearch {
    pub fn new(per_query: usize) -> Self {
        Self {
            per_query,
            delay: Duration::ZERO,
            quota_exhausted_on: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call takes `delay` (tokio time)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls with these 0-based indexes fail with `QuotaExhausted`
    pub fn exhausted_on(mut self, calls: &[usize]) -> Self {
        self.quota_exhausted_on = calls.iter().copied().collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn slug(query: &str) -> String {
    query
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str, max_results: usize) -> std::result::Result<SearchOutcome, SearchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.quota_exhausted_on.contains(&call) {
            return Err(SearchError::QuotaExhausted("daily quota used".to_string()));
        }

        let results = (0..self.per_query.min(max_results))
            .map(|i| SearchHit {
                title: format!("{} guide part {}", query, i + 1),
                url: format!("https://docs.example.org/{}/{}", slug(query), i),
                body: format!(
                    "A practical {} walkthrough with 3 examples, 12 benchmarks and notes from 2024. \
                     Covers {} in depth, section {}.",
                    query,
                    query,
                    i + 1
                ),
            })
            .collect();

        Ok(SearchOutcome {
            results,
            engine_used: "fake".to_string(),
            quota_remaining: Some(100),
        })
    }
}

/// Search provider that panics on every call
pub struct PanickingSearch;

#[async_trait]
impl SearchProvider for PanickingSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> std::result::Result<SearchOutcome, SearchError> {
        panic!("search backend exploded");
    }
}

/// Scoring service answering every request with the same scores
pub struct FixedScorer {
    response: ScoreResponse,
    prefilter_cost: f64,
    deep_cost: f64,
    prefilter_calls: AtomicUsize,
    deep_calls: AtomicUsize,
}

impl FixedScorer {
    /// High scores that pass the default thresholds
    pub fn passing() -> Self {
        Self::with_scores(0.9, 0.8, 0.8, 0.9)
    }

    pub fn with_scores(relevance: f64, quality: f64, importance: f64, confidence: f64) -> Self {
        Self {
            response: ScoreResponse {
                relevance,
                quality,
                importance,
                confidence,
                category: "tutorial".to_string(),
                key_topics: vec!["async".to_string(), "tokio".to_string()],
                reason: "fixed".to_string(),
                summary: "Worth reading".to_string(),
                tokens: 120,
                cost: 0.0,
            },
            prefilter_cost: 0.0,
            deep_cost: 0.01,
            prefilter_calls: AtomicUsize::new(0),
            deep_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_costs(mut self, prefilter_cost: f64, deep_cost: f64) -> Self {
        self.prefilter_cost = prefilter_cost;
        self.deep_cost = deep_cost;
        self
    }

    pub fn prefilter_calls(&self) -> usize {
        self.prefilter_calls.load(Ordering::SeqCst)
    }

    pub fn deep_calls(&self) -> usize {
        self.deep_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringService for FixedScorer {
    async fn score(&self, request: &ScoreRequest) -> std::result::Result<ScoreResponse, ScoringError> {
        let cost = match request.mode {
            ScoringMode::PreFilter => {
                self.prefilter_calls.fetch_add(1, Ordering::SeqCst);
                self.prefilter_cost
            }
            ScoringMode::Deep => {
                self.deep_calls.fetch_add(1, Ordering::SeqCst);
                self.deep_cost
            }
        };
        Ok(ScoreResponse {
            cost,
            ..self.response.clone()
        })
    }
}

/// Scoring service that is always rate limited
#[derive(Default)]
pub struct RateLimitedScorer {
    calls: AtomicUsize,
    retry_after: Option<Duration>,
}

impl RateLimitedScorer {
    /// Every response carries a Retry-After hint
    pub fn with_retry_after(retry_after: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            retry_after: Some(retry_after),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringService for RateLimitedScorer {
    async fn score(&self, _request: &ScoreRequest) -> std::result::Result<ScoreResponse, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScoringError::RateLimited {
            retry_after: self.retry_after,
        })
    }
}

/// Session store keeping merged documents in memory
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<Uuid, SessionFile>>,
}

impl MemoryStore {
    pub fn file(&self, session_id: Uuid) -> Option<SessionFile> {
        self.files.lock().unwrap().get(&session_id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_metadata(&self, session: &Session) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .entry(session.session_id)
            .or_default()
            .merge(session, None);
        Ok(())
    }

    async fn save_phase_output(&self, session: &Session, key: PhaseKey, data: Value) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .entry(session.session_id)
            .or_default()
            .merge(session, Some((key, data)));
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionFile>> {
        Ok(self.file(session_id))
    }

    async fn list_session_ids(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.files.lock().unwrap().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}
