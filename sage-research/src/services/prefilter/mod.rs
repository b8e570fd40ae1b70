//! PreFilterEngine: cheap first-pass scoring ahead of deep analysis
//!
//! Per document:
//! 1. Content hash lookup in the shared [`ScoreCache`]; a live entry is returned as-is
//! 2. Otherwise the scoring service is called in pre-filter mode, with
//!    backoff retries on rate limiting
//! 3. On exhausted retries or any other failure, the deterministic
//!    [`heuristic`] scorer answers instead
//!
//! Batch scoring also takes a cutoff future. Documents still waiting on the
//! service (including backoff sleeps) when it resolves are scored
//! heuristically and the batch reports itself halted.
//!
//! After `degrade_after` consecutive exhausted rate-limit retries the engine
//! stops calling the service for `degrade_cooldown` and scores heuristically.
//! Heuristic results are never cached.

pub mod cache;
pub mod heuristic;
pub mod summary;

pub use cache::{CacheStats, ScoreCache};
pub use summary::FilterSummary;

use futures::future::{join_all, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use sage_common::Result;

use crate::models::{Document, FilterThresholds, PreFilterConfig, PreFilterResult, ScorerKind};
use crate::services::scoring_service::{ScoreRequest, ScoringError, ScoringMode, ScoringService};
use crate::utils::{retry_with_backoff, RetryPolicy};

/// Outcome of [`PreFilterEngine::filter_batch`]
#[derive(Debug, Clone, Default)]
pub struct FilterBatchOutcome {
    /// One result per processed document, in input order
    pub results: Vec<PreFilterResult>,
    /// True when the checkpoint or the cutoff stopped processing early
    pub halted: bool,
}

#[derive(Debug, Default)]
struct DegradeState {
    consecutive_exhaustions: u32,
    degraded_until: Option<Instant>,
}

pub struct PreFilterEngine {
    scoring: Arc<dyn ScoringService>,
    cache: Arc<ScoreCache>,
    config: PreFilterConfig,
    thresholds: RwLock<FilterThresholds>,
    degrade: Mutex<DegradeState>,
}

impl PreFilterEngine {
    pub fn new(scoring: Arc<dyn ScoringService>, cache: Arc<ScoreCache>, config: PreFilterConfig) -> Self {
        let thresholds = RwLock::new(config.thresholds);
        Self {
            scoring,
            cache,
            config,
            thresholds,
            degrade: Mutex::new(DegradeState::default()),
        }
    }

    pub fn config(&self) -> &PreFilterConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ScoreCache> {
        &self.cache
    }

    pub async fn thresholds(&self) -> FilterThresholds {
        *self.thresholds.read().await
    }

    /// Replace thresholds; only results computed afterwards see them
    pub async fn set_thresholds(&self, thresholds: FilterThresholds) -> Result<()> {
        thresholds.validate()?;
        *self.thresholds.write().await = thresholds;
        tracing::info!(
            relevance_min = thresholds.relevance_min,
            quality_min = thresholds.quality_min,
            importance_min = thresholds.importance_min,
            confidence_min = thresholds.confidence_min,
            combined_min = thresholds.combined_min,
            "Pre-filter thresholds updated"
        );
        Ok(())
    }

    /// True while the service is being skipped after persistent rate limiting
    pub async fn is_degraded(&self) -> bool {
        let state = self.degrade.lock().await;
        state.degraded_until.is_some_and(|until| Instant::now() < until)
    }

    /// Score every document; one result per input, same order
    pub async fn filter(&self, documents: &[Document], topic: &str, categories: &[String]) -> Vec<PreFilterResult> {
        self.filter_batch(documents, topic, categories, |_, _| async { true }, std::future::pending())
            .await
            .results
    }

    /// Score documents in sub-batches of `sub_batch_size`
    ///
    /// `checkpoint(processed, cost_so_far)` is awaited before each sub-batch (it
    /// may block, e.g. while a session is paused); resolving to `false` stops
    /// processing and marks the outcome halted. A mandatory delay
    /// (doubled in safe mode) separates consecutive sub-batches.
    ///
    /// Once `cutoff` resolves no further service call is awaited: documents
    /// in flight get heuristic scores, later sub-batches are not started and
    /// the outcome is marked halted.
    pub async fn filter_batch<F, Fut, C>(
        &self,
        documents: &[Document],
        topic: &str,
        categories: &[String],
        mut checkpoint: F,
        cutoff: C,
    ) -> FilterBatchOutcome
    where
        F: FnMut(usize, f64) -> Fut,
        Fut: Future<Output = bool>,
        C: Future<Output = ()>,
    {
        let cutoff = cutoff.shared();
        let sub_batch_size = self.config.rate_limit.sub_batch_size.max(1);
        let interval = self.config.effective_interval();
        let mut outcome = FilterBatchOutcome {
            results: Vec::with_capacity(documents.len()),
            halted: false,
        };
        let mut cost = 0.0;

        for (index, chunk) in documents.chunks(sub_batch_size).enumerate() {
            if !checkpoint(outcome.results.len(), cost).await {
                tracing::info!(
                    processed = outcome.results.len(),
                    remaining = documents.len() - outcome.results.len(),
                    "Pre-filter halted at checkpoint"
                );
                outcome.halted = true;
                break;
            }
            if index > 0 && !interval.is_zero() {
                let cut = tokio::select! {
                    biased;
                    _ = tokio::time::sleep(interval) => false,
                    _ = cutoff.clone() => true,
                };
                if cut {
                    outcome.halted = true;
                    break;
                }
            }

            let scored = join_all(chunk.iter().map(|doc| {
                let cutoff = cutoff.clone();
                async move {
                    tokio::select! {
                        biased;
                        result = self.filter_document(doc, topic, categories) => Some(result),
                        _ = cutoff => None,
                    }
                }
            }))
            .await;

            let thresholds = self.thresholds().await;
            let mut abandoned = 0;
            for (doc, result) in chunk.iter().zip(scored) {
                let result = result.unwrap_or_else(|| {
                    abandoned += 1;
                    let hash = doc.content_hash();
                    self.heuristic_result(doc, &hash, topic, categories, &thresholds, "session limit reached")
                });
                cost += result.cost;
                outcome.results.push(result);
            }

            if abandoned > 0 {
                tracing::info!(
                    abandoned,
                    remaining = documents.len() - outcome.results.len(),
                    "Pre-filter cut off while waiting on scoring service"
                );
                outcome.halted = true;
                break;
            }
        }

        let passed = outcome.results.iter().filter(|r| r.should_proceed).count();
        tracing::debug!(
            total = outcome.results.len(),
            passed,
            cost,
            halted = outcome.halted,
            "Pre-filter batch finished"
        );
        outcome
    }

    /// Heuristic scores only, for when no further service spend is allowed
    pub async fn filter_heuristic(
        &self,
        documents: &[Document],
        topic: &str,
        categories: &[String],
    ) -> Vec<PreFilterResult> {
        let thresholds = self.thresholds().await;
        documents
            .iter()
            .map(|doc| {
                let hash = doc.content_hash();
                self.heuristic_result(doc, &hash, topic, categories, &thresholds, "session limit reached")
            })
            .collect()
    }

    /// Score one document; never fails
    pub async fn filter_document(&self, document: &Document, topic: &str, categories: &[String]) -> PreFilterResult {
        let hash = document.content_hash();

        if let Some(mut cached) = self.cache.get(&hash).await {
            cached.source_id = document.source_id.clone();
            cached.cache_hit = true;
            cached.cost = 0.0;
            return cached;
        }

        let thresholds = self.thresholds().await;

        if self.is_degraded().await {
            return self.heuristic_result(document, &hash, topic, categories, &thresholds, "degraded mode");
        }

        let request = ScoreRequest {
            text: document.scoring_text(),
            topic: topic.to_string(),
            categories: categories.to_vec(),
            mode: ScoringMode::PreFilter,
        };
        let policy = RetryPolicy::from_rate_limit(&self.config.rate_limit);

        match retry_with_backoff("pre-filter scoring", &policy, || self.scoring.score(&request)).await {
            Ok(response) => {
                self.record_success().await;
                let result = PreFilterResult::scored(
                    document.source_id.clone(),
                    hash.clone(),
                    response.relevance,
                    response.quality,
                    response.importance,
                    response.confidence,
                    response.category,
                    response.key_topics,
                    response.reason,
                    response.cost,
                    ScorerKind::Service,
                    &thresholds,
                );
                self.cache.insert(hash, result.clone()).await;
                result
            }
            Err(err) => {
                if err.is_rate_limited() {
                    self.record_exhaustion().await;
                }
                tracing::warn!(
                    source_id = %document.source_id,
                    error = %err,
                    "Scoring service failed, using heuristic scorer"
                );
                let why = match err {
                    ScoringError::RateLimited { .. } => "rate limited after retries",
                    _ => "scoring service unavailable",
                };
                self.heuristic_result(document, &hash, topic, categories, &thresholds, why)
            }
        }
    }

    fn heuristic_result(
        &self,
        document: &Document,
        hash: &str,
        topic: &str,
        categories: &[String],
        thresholds: &FilterThresholds,
        why: &str,
    ) -> PreFilterResult {
        let score = heuristic::score(&document.title, &document.body, &document.url, topic, categories);
        PreFilterResult::scored(
            document.source_id.clone(),
            hash.to_string(),
            score.relevance,
            score.quality,
            score.importance,
            score.confidence,
            score.category,
            score.key_topics,
            format!("{} ({})", score.reason, why),
            0.0,
            ScorerKind::Heuristic,
            thresholds,
        )
    }

    async fn record_success(&self) {
        let mut state = self.degrade.lock().await;
        state.consecutive_exhaustions = 0;
    }

    async fn record_exhaustion(&self) {
        let mut state = self.degrade.lock().await;
        state.consecutive_exhaustions += 1;
        if state.consecutive_exhaustions >= self.config.degrade_after.max(1) {
            let cooldown = self.config.degrade_cooldown();
            state.degraded_until = Some(Instant::now() + cooldown);
            state.consecutive_exhaustions = 0;
            tracing::warn!(
                cooldown_secs = cooldown.as_secs(),
                "Scoring service persistently rate limited, switching to heuristic scoring"
            );
        }
    }

    /// Aggregate statistics; total over any input
    pub fn summarize(results: &[PreFilterResult]) -> FilterSummary {
        FilterSummary::from_results(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scoring_service::ScoreResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedScorer {
        calls: AtomicUsize,
        relevance: f64,
    }

    #[async_trait]
    impl ScoringService for FixedScorer {
        async fn score(&self, _request: &ScoreRequest) -> std::result::Result<ScoreResponse, ScoringError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScoreResponse {
                relevance: self.relevance,
                quality: 0.8,
                importance: 0.7,
                category: "research".into(),
                key_topics: vec!["rust".into()],
                confidence: 0.9,
                reason: "fixed".into(),
                cost: 0.001,
                ..Default::default()
            })
        }
    }

    struct AlwaysLimited {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScoringService for AlwaysLimited {
        async fn score(&self, _request: &ScoreRequest) -> std::result::Result<ScoreResponse, ScoringError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ScoringError::RateLimited { retry_after: None })
        }
    }

    struct FlakyScorer {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl ScoringService for FlakyScorer {
        async fn score(&self, _request: &ScoreRequest) -> std::result::Result<ScoreResponse, ScoringError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(ScoringError::Unavailable("connection reset".into()));
            }
            Ok(ScoreResponse {
                relevance: 0.9,
                quality: 0.8,
                importance: 0.7,
                confidence: 0.9,
                cost: 0.001,
                ..Default::default()
            })
        }
    }

    fn docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| {
                Document::new(
                    "test",
                    format!("Rust ownership part {}", i),
                    format!("ownership and borrowing in rust, chapter {}", i),
                    format!("https://example.com/{}", i),
                )
            })
            .collect()
    }

    fn fast_config() -> PreFilterConfig {
        let mut config = PreFilterConfig::default();
        config.rate_limit.inter_call_interval_ms = 0;
        config.rate_limit.initial_backoff_ms = 1;
        config.rate_limit.max_backoff_ms = 2;
        config
    }

    #[tokio::test]
    async fn test_second_pass_hits_cache() {
        let scorer = Arc::new(FixedScorer { calls: AtomicUsize::new(0), relevance: 0.9 });
        let cache = Arc::new(ScoreCache::new(Duration::from_secs(60)));
        let engine = PreFilterEngine::new(scorer.clone(), cache, fast_config());
        let input = docs(3);

        let first = engine.filter(&input, "rust ownership", &[]).await;
        let second = engine.filter(&input, "rust ownership", &[]).await;

        assert_eq!(scorer.calls.load(Ordering::SeqCst), 3);
        assert!(first.iter().all(|r| !r.cache_hit && r.cost > 0.0));
        assert!(second.iter().all(|r| r.cache_hit && r.cost == 0.0));
        assert_eq!(
            first.iter().map(|r| r.should_proceed).collect::<Vec<_>>(),
            second.iter().map(|r| r.should_proceed).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_threshold_change_applies_to_new_results_only() {
        let scorer = Arc::new(FixedScorer { calls: AtomicUsize::new(0), relevance: 0.6 });
        let cache = Arc::new(ScoreCache::new(Duration::from_secs(60)));
        let engine = PreFilterEngine::new(scorer, cache, fast_config());
        let input = docs(2);

        let before = engine.filter(&input[..1], "rust", &[]).await;
        assert!(before[0].should_proceed);

        let strict = FilterThresholds { relevance_min: 0.95, ..FilterThresholds::default() };
        engine.set_thresholds(strict).await.unwrap();

        let cached = engine.filter(&input[..1], "rust", &[]).await;
        assert!(cached[0].cache_hit && cached[0].should_proceed);

        let fresh = engine.filter(&input[1..], "rust", &[]).await;
        assert!(!fresh[0].should_proceed);
    }

    #[tokio::test]
    async fn test_invalid_thresholds_rejected() {
        let scorer = Arc::new(FixedScorer { calls: AtomicUsize::new(0), relevance: 0.6 });
        let engine = PreFilterEngine::new(scorer, Arc::new(ScoreCache::new(Duration::from_secs(1))), fast_config());
        let bad = FilterThresholds { quality_min: 1.5, ..FilterThresholds::default() };
        assert!(engine.set_thresholds(bad).await.is_err());
        assert_eq!(engine.thresholds().await, FilterThresholds::default());
    }

    #[tokio::test]
    async fn test_rate_limited_service_falls_back_and_degrades() {
        let scorer = Arc::new(AlwaysLimited { calls: AtomicUsize::new(0) });
        let cache = Arc::new(ScoreCache::new(Duration::from_secs(60)));
        let mut config = fast_config();
        config.rate_limit.max_retries = 2;
        config.rate_limit.sub_batch_size = 1;
        config.degrade_after = 2;
        let engine = PreFilterEngine::new(scorer.clone(), cache.clone(), config);

        let results = engine.filter(&docs(5), "rust ownership", &[]).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.scorer == ScorerKind::Heuristic));
        assert!(results.iter().all(|r| r.cost == 0.0));
        // Two documents exhaust retries (3 attempts each), then the service is skipped
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 6);
        assert!(engine.is_degraded().await);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_halts_between_sub_batches() {
        let scorer = Arc::new(FixedScorer { calls: AtomicUsize::new(0), relevance: 0.9 });
        let mut config = fast_config();
        config.rate_limit.sub_batch_size = 2;
        let engine = PreFilterEngine::new(scorer, Arc::new(ScoreCache::new(Duration::from_secs(60))), config);

        let mut seen = Vec::new();
        let outcome = engine
            .filter_batch(
                &docs(5),
                "rust",
                &[],
                |processed, _cost| {
                    seen.push(processed);
                    let keep = processed < 4;
                    async move { keep }
                },
                std::future::pending(),
            )
            .await;

        assert!(outcome.halted);
        assert_eq!(outcome.results.len(), 4);
        assert_eq!(seen, vec![0, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_batch_delay_doubles_in_safe_mode() {
        let scorer = Arc::new(FixedScorer { calls: AtomicUsize::new(0), relevance: 0.9 });
        let mut config = PreFilterConfig::default();
        config.safe_mode = true;
        config.rate_limit.sub_batch_size = 1;
        config.rate_limit.inter_call_interval_ms = 100;
        let engine = PreFilterEngine::new(scorer, Arc::new(ScoreCache::new(Duration::from_secs(60))), config);

        let start = Instant::now();
        engine.filter(&docs(3), "rust", &[]).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cutoff_abandons_backoff_wait() {
        let scorer = Arc::new(AlwaysLimited { calls: AtomicUsize::new(0) });
        let mut config = PreFilterConfig::default();
        config.rate_limit.sub_batch_size = 2;
        config.rate_limit.initial_backoff_ms = 30_000;
        config.rate_limit.max_backoff_ms = 30_000;
        let engine = PreFilterEngine::new(scorer.clone(), Arc::new(ScoreCache::new(Duration::from_secs(60))), config);

        let start = Instant::now();
        let outcome = engine
            .filter_batch(
                &docs(5),
                "rust ownership",
                &[],
                |_, _| async { true },
                tokio::time::sleep(Duration::from_secs(10)),
            )
            .await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11), "{:?}", elapsed);
        assert!(outcome.halted);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.scorer == ScorerKind::Heuristic && r.cost == 0.0));
        assert!(outcome.results[0].reason.contains("session limit reached"));
        // One attempt per document, the backoff sleep was abandoned
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 2);
        assert!(!engine.is_degraded().await);
    }

    #[tokio::test]
    async fn test_transient_outage_is_retried() {
        let scorer = Arc::new(FlakyScorer { calls: AtomicUsize::new(0), failures: 1 });
        let engine = PreFilterEngine::new(scorer.clone(), Arc::new(ScoreCache::new(Duration::from_secs(60))), fast_config());

        let results = engine.filter(&docs(1), "rust", &[]).await;

        assert_eq!(results[0].scorer, ScorerKind::Service);
        assert!(results[0].cost > 0.0);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_filter_heuristic_never_calls_service() {
        let scorer = Arc::new(FixedScorer { calls: AtomicUsize::new(0), relevance: 0.9 });
        let engine = PreFilterEngine::new(scorer.clone(), Arc::new(ScoreCache::new(Duration::from_secs(60))), fast_config());

        let results = engine.filter_heuristic(&docs(3), "rust ownership", &[]).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.scorer == ScorerKind::Heuristic && r.cost == 0.0));
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = PreFilterEngine::summarize(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.pass_rate, 0.0);
    }
}
