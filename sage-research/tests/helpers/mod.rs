//! Test Helper Utilities
//!
//! Shared fakes and orchestrator wiring for sage-research integration tests

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{FakeSearch, FixedScorer, MemoryStore, PanickingSearch, RateLimitedScorer};

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use sage_common::events::EventBus;
use sage_research::models::{NewSession, PipelineConfig, PreFilterConfig, RateLimitConfig};
use sage_research::services::{
    PreFilterEngine, ScoreCache, ScoringService, SearchProvider, SessionOrchestrator,
};
use sage_research::store::{PhaseKey, SessionFile, SessionStore};

/// Pre-filter settings without inter-batch delays and with millisecond backoff
pub fn fast_prefilter() -> PreFilterConfig {
    PreFilterConfig {
        rate_limit: RateLimitConfig {
            inter_call_interval_ms: 0,
            sub_batch_size: 4,
            max_retries: 1,
            initial_backoff_ms: 1,
            backoff_factor: 2.0,
            max_backoff_ms: 5,
        },
        ..PreFilterConfig::default()
    }
}

/// Pipeline settings without inter-batch delays
pub fn fast_pipeline() -> PipelineConfig {
    PipelineConfig {
        results_per_query: 4,
        analysis_batch_delay_ms: 0,
        ..PipelineConfig::default()
    }
}

/// Orchestrator wired to the given collaborators
pub struct Harness {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub store: Arc<dyn SessionStore>,
    pub event_bus: EventBus,
}

impl Harness {
    pub fn new(
        store: Arc<dyn SessionStore>,
        search: Arc<dyn SearchProvider>,
        scoring: Arc<dyn ScoringService>,
        pipeline: PipelineConfig,
        prefilter: PreFilterConfig,
    ) -> Self {
        let cache = Arc::new(ScoreCache::new(prefilter.cache_ttl()));
        let engine = Arc::new(PreFilterEngine::new(scoring.clone(), cache, prefilter));
        let event_bus = EventBus::new(1000);
        let orchestrator = Arc::new(SessionOrchestrator::new(
            store.clone(),
            search,
            scoring,
            engine,
            pipeline,
            event_bus.clone(),
        ));
        Self {
            orchestrator,
            store,
            event_bus,
        }
    }

    /// In-memory store, fast pipeline and pre-filter settings
    pub fn in_memory(search: Arc<dyn SearchProvider>, scoring: Arc<dyn ScoringService>) -> Self {
        Self::new(
            Arc::new(MemoryStore::default()),
            search,
            scoring,
            fast_pipeline(),
            fast_prefilter(),
        )
    }

    pub async fn file(&self, session_id: Uuid) -> SessionFile {
        self.store
            .load(session_id)
            .await
            .unwrap()
            .expect("session file should exist")
    }

    /// Create and start a session, returning its id
    pub async fn launch(&self, request: NewSession) -> Uuid {
        let id = self.orchestrator.create_session(request).await.unwrap();
        self.orchestrator.start_session(id).await.unwrap();
        id
    }
}

/// Depth-1 session request with generous limits
pub fn session_request(topic: &str) -> NewSession {
    NewSession::new(topic, Duration::from_secs(3600), 10.0)
}

/// Typed phase output, panicking if absent
pub fn phase<T: serde::de::DeserializeOwned>(file: &SessionFile, key: PhaseKey) -> T {
    file.phase(key)
        .unwrap()
        .unwrap_or_else(|| panic!("{} missing from session file", key.as_str()))
}
