//! Data models for sage-research

pub mod document;
pub mod outputs;
pub mod parameters;
pub mod session;

pub use document::{content_hash, Document, PreFilterResult, ScorerKind, MAX_KEY_TOPICS};
pub use outputs::{
    AnalysisFailure, AnalysisResults, AnalyzedDocument, AverageScores, CollectionResults,
    GeneratedKnowledge, KnowledgeSource, PreprocessingSummary, QueryRecord, TopicCount,
};
pub use parameters::{FilterThresholds, PipelineConfig, PreFilterConfig, RateLimitConfig, ScoreWeights};
pub use session::{
    Finding, NewSession, Phase, Session, SessionConfig, SessionProgress, SessionState,
    SessionStatus, SessionStatusReport, StateTransition, StopReason,
};
