//! Service modules for the learning session pipeline
//!
//! External collaborators (search, scoring) sit behind traits so that the
//! orchestrator and the pre-filter can be driven by fakes in tests.

pub mod prefilter;
pub mod progress;
pub mod query_planner;
pub mod scoring_service;
pub mod search_provider;
pub mod session_orchestrator;

pub use prefilter::{FilterBatchOutcome, FilterSummary, PreFilterEngine, ScoreCache};
pub use progress::{ProgressCallback, ProgressNotifier, ProgressUpdate};
pub use scoring_service::{
    HttpScoringService, ScoreRequest, ScoreResponse, ScoringError, ScoringMode, ScoringService,
    UnconfiguredScoringService,
};
pub use search_provider::{
    HttpSearchProvider, SearchError, SearchHit, SearchOutcome, SearchProvider, UnconfiguredSearchProvider,
};
pub use session_orchestrator::{RecoveryReport, SessionOrchestrator, INTERRUPTED_BY_RESTART};
