//! Learning session state machine
//!
//! A session progresses READY → RUNNING → {COMPLETED | ERROR}, with an
//! operator-driven RUNNING ⇄ PAUSED detour. A forced stop ends in COMPLETED
//! with `truncated = true`.
//!
//! Configuration is immutable once created; only [`SessionState`] changes,
//! and only the orchestrator changes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use sage_common::{Error, Result};

use crate::store::PhaseKey;

/// Lowest and highest accepted depth level
pub const MIN_DEPTH_LEVEL: u8 = 1;
pub const MAX_DEPTH_LEVEL: u8 = 5;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created and persisted, not started
    Ready,
    /// Worker is executing phases
    Running,
    /// Operator paused; worker blocks at its next checkpoint
    Paused,
    /// Finished, possibly truncated by a limit or an operator stop
    Completed,
    /// Unexpected failure during phase execution
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ready => "ready",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    /// Legal state machine edges
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Ready, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Paused, Completed)
                | (Running, Error)
                | (Paused, Error)
        )
    }
}

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Collection,
    PreFilter,
    DeepAnalysis,
    Integration,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Collection,
        Phase::PreFilter,
        Phase::DeepAnalysis,
        Phase::Integration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Collection => "collection",
            Phase::PreFilter => "pre_filter",
            Phase::DeepAnalysis => "deep_analysis",
            Phase::Integration => "integration",
        }
    }

    /// Persisted session file key holding this phase's output
    pub fn output_key(&self) -> PhaseKey {
        match self {
            Phase::Collection => PhaseKey::CollectionResults,
            Phase::PreFilter => PhaseKey::PreprocessingSummary,
            Phase::DeepAnalysis => PhaseKey::AnalysisResults,
            Phase::Integration => PhaseKey::GeneratedKnowledge,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended before running every unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TimeLimit,
    BudgetLimit,
    OperatorStop,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::TimeLimit => "time_limit",
            StopReason::BudgetLimit => "budget_limit",
            StopReason::OperatorStop => "operator_stop",
        }
    }
}

/// Request to create a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub topic: String,
    #[serde(default = "default_learning_type")]
    pub learning_type: String,
    #[serde(default = "default_depth_level")]
    pub depth_level: u8,
    /// Time limit in seconds
    pub time_limit_secs: u64,
    /// Budget limit in dollars
    pub budget_limit: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parent_session_id: Option<Uuid>,
}

fn default_learning_type() -> String {
    "general".to_string()
}

fn default_depth_level() -> u8 {
    MIN_DEPTH_LEVEL
}

impl NewSession {
    pub fn new(topic: impl Into<String>, time_limit: Duration, budget_limit: f64) -> Self {
        Self {
            topic: topic.into(),
            learning_type: default_learning_type(),
            depth_level: default_depth_level(),
            time_limit_secs: time_limit.as_secs(),
            budget_limit,
            tags: Vec::new(),
            parent_session_id: None,
        }
    }

    pub fn with_depth(mut self, depth_level: u8) -> Self {
        self.depth_level = depth_level;
        self
    }

    pub fn with_learning_type(mut self, learning_type: impl Into<String>) -> Self {
        self.learning_type = learning_type.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Validate and freeze into an immutable configuration
    pub fn into_config(self) -> Result<SessionConfig> {
        let topic = self.topic.trim().to_string();
        if topic.is_empty() {
            return Err(Error::InvalidInput("topic must not be empty".to_string()));
        }
        if !(MIN_DEPTH_LEVEL..=MAX_DEPTH_LEVEL).contains(&self.depth_level) {
            return Err(Error::InvalidInput(format!(
                "depth_level must be between {} and {}, got {}",
                MIN_DEPTH_LEVEL, MAX_DEPTH_LEVEL, self.depth_level
            )));
        }
        if self.time_limit_secs == 0 {
            return Err(Error::InvalidInput(
                "time_limit_secs must be greater than zero".to_string(),
            ));
        }
        if !self.budget_limit.is_finite() || self.budget_limit <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "budget_limit must be a positive amount, got {}",
                self.budget_limit
            )));
        }

        let learning_type = match self.learning_type.trim() {
            "" => default_learning_type(),
            other => other.to_string(),
        };

        Ok(SessionConfig {
            topic,
            learning_type,
            depth_level: self.depth_level,
            time_limit_secs: self.time_limit_secs,
            budget_limit: self.budget_limit,
            tags: self
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            parent_session_id: self.parent_session_id,
            created_at: Utc::now(),
        })
    }
}

/// Immutable session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub topic: String,
    pub learning_type: String,
    /// 1-5, controls how many search queries are generated
    pub depth_level: u8,
    pub time_limit_secs: u64,
    /// Budget limit in dollars
    pub budget_limit: f64,
    pub tags: Vec<String>,
    pub parent_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl SessionConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }
}

/// Notable document surfaced by deep analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub category: String,
    pub importance: f64,
    pub summary: String,
}

/// Mutable session state, owned by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub current_phase: Option<Phase>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub documents_collected: usize,
    pub documents_processed: usize,
    /// Accumulated cost in dollars
    pub total_cost: f64,
    pub important_findings: Vec<Finding>,
    /// True when a limit or an operator stop cut the run short
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: SessionStatus::Ready,
            current_phase: None,
            started_at: None,
            ended_at: None,
            documents_collected: 0,
            documents_processed: 0,
            total_cost: 0.0,
            important_findings: Vec::new(),
            truncated: false,
            stop_reason: None,
            error_message: None,
        }
    }
}

/// Recorded state machine edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub old_status: SessionStatus,
    pub new_status: SessionStatus,
    pub transitioned_at: DateTime<Utc>,
}

impl SessionState {
    /// Move along a legal edge, stamping start/end times
    pub fn transition_to(&mut self, new_status: SessionStatus) -> Result<StateTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(Error::InvalidState(format!(
                "cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            )));
        }

        let now = Utc::now();
        let transition = StateTransition {
            old_status: self.status,
            new_status,
            transitioned_at: now,
        };
        self.status = new_status;

        if new_status == SessionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if new_status.is_terminal() {
            self.ended_at = Some(now);
        }

        Ok(transition)
    }

    /// Mark the run as cut short; the first reason recorded wins
    pub fn mark_truncated(&mut self, reason: StopReason) {
        self.truncated = true;
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
    }

    /// Wall-clock seconds since start (frozen at end)
    pub fn elapsed_secs(&self) -> f64 {
        match self.started_at {
            Some(start) => {
                let end = self.ended_at.unwrap_or_else(Utc::now);
                ((end - start).num_milliseconds().max(0) as f64) / 1000.0
            }
            None => 0.0,
        }
    }
}

/// Point-in-time copy of a session handed to callers and the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub config: SessionConfig,
    pub state: SessionState,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            config,
            state: SessionState::default(),
        }
    }

    pub fn status_report(&self) -> SessionStatusReport {
        SessionStatusReport {
            session_id: self.session_id,
            topic: self.config.topic.clone(),
            status: self.state.status,
            phase: self.state.current_phase,
            progress: SessionProgress {
                collected: self.state.documents_collected,
                processed: self.state.documents_processed,
                cost: self.state.total_cost,
                elapsed_secs: self.state.elapsed_secs(),
            },
            truncated: self.state.truncated,
            stop_reason: self.state.stop_reason,
            error_message: self.state.error_message.clone(),
        }
    }
}

/// Running totals reported by `get_session_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub collected: usize,
    pub processed: usize,
    pub cost: f64,
    pub elapsed_secs: f64,
}

/// Status view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusReport {
    pub session_id: Uuid,
    pub topic: String,
    pub status: SessionStatus,
    pub phase: Option<Phase>,
    pub progress: SessionProgress,
    pub truncated: bool,
    pub stop_reason: Option<StopReason>,
    pub error_message: Option<String>,
}
