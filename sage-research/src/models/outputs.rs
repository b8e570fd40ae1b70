//! Typed phase outputs stored under the session file's phase keys

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Document, Finding, PreFilterResult, StopReason};
use crate::services::prefilter::FilterSummary;

/// One issued search query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query: String,
    #[serde(default)]
    pub engine_used: Option<String>,
    /// Hits returned by the provider (before de-duplication)
    pub results: usize,
    /// Hits that were new to this session
    pub new_documents: usize,
    #[serde(default)]
    pub quota_remaining: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub quota_exhausted: bool,
}

/// `collection_results`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionResults {
    pub planned_queries: Vec<String>,
    pub queries: Vec<QueryRecord>,
    pub documents: Vec<Document>,
    pub total_documents: usize,
    /// Collection stopped before every planned query ran
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

/// `preprocessing_summary`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingSummary {
    /// False when the pipeline skipped pre-filtering
    pub enabled: bool,
    pub summary: FilterSummary,
    pub results: Vec<PreFilterResult>,
    /// Source ids handed to deep analysis, best first
    pub selected: Vec<String>,
    /// Passing documents dropped as content duplicates
    pub duplicates_removed: usize,
    /// Passing documents dropped by the top-N cap
    pub capped: usize,
    /// Documents scored heuristically because a limit was reached
    #[serde(default)]
    pub heuristic_after_limit: usize,
    #[serde(default)]
    pub truncated: bool,
}

/// One document scored in deep mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedDocument {
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub relevance: f64,
    pub quality: f64,
    pub importance: f64,
    pub confidence: f64,
    pub category: String,
    pub key_topics: Vec<String>,
    pub summary: String,
    pub tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub source_id: String,
    pub error: String,
}

/// `analysis_results`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub analyzed: Vec<AnalyzedDocument>,
    pub failures: Vec<AnalysisFailure>,
    pub batches_completed: usize,
    pub total_cost: f64,
    /// Set when the phase did not run at all
    #[serde(default)]
    pub skipped_reason: Option<String>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageScores {
    pub relevance: f64,
    pub quality: f64,
    pub importance: f64,
}

/// Where the knowledge summary's numbers came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    DeepAnalysis,
    PreFilter,
    Empty,
}

/// `generated_knowledge`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedKnowledge {
    pub topic: String,
    pub source: KnowledgeSource,
    pub documents_considered: usize,
    pub category_distribution: BTreeMap<String, usize>,
    pub top_key_topics: Vec<TopicCount>,
    pub average_scores: AverageScores,
    pub findings: Vec<Finding>,
}
