//! Learning session orchestrator
//!
//! Owns the registry of sessions and drives each one through its phases on a
//! dedicated tokio task.
//!
//! # State Progression
//! READY → RUNNING ⇄ PAUSED → COMPLETED | ERROR
//!
//! # Architecture
//! Each phase is implemented by a `phase_*` method on [`runner::SessionRunner`]:
//!
//! - **COLLECTION**: planned search queries, de-duplicated documents
//! - **PRE_FILTER**: cheap two-tier scoring, selection of the top documents
//! - **DEEP_ANALYSIS**: expensive scoring in batches, important findings
//! - **INTEGRATION**: knowledge summary over whatever was analyzed
//!
//! Time limit, budget limit, pause and operator stop are evaluated at
//! checkpoints before every unit of work (see [`control::Gate`]).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use sage_common::events::{EventBus, LearningEvent};
use sage_common::{Error, Result};

use crate::models::{
    NewSession, PipelineConfig, PreprocessingSummary, Session, SessionStatus, SessionStatusReport,
};
use crate::services::prefilter::{FilterSummary, PreFilterEngine};
use crate::services::progress::{ProgressCallback, ProgressNotifier};
use crate::services::scoring_service::ScoringService;
use crate::services::search_provider::SearchProvider;
use crate::store::{PhaseKey, SessionFile, SessionStore};

mod control;
mod phase_analysis;
mod phase_collection;
mod phase_integration;
mod phase_prefilter;
mod runner;

use control::SessionHandle;
use runner::SessionRunner;

/// Error message recorded on sessions found mid-run at startup
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// Collaborators shared by every session worker
#[derive(Clone)]
pub(crate) struct PipelineContext {
    pub store: Arc<dyn SessionStore>,
    pub search: Arc<dyn SearchProvider>,
    pub scoring: Arc<dyn ScoringService>,
    pub prefilter: Arc<PreFilterEngine>,
    pub pipeline: Arc<PipelineConfig>,
    pub progress: Arc<ProgressNotifier>,
}

/// Outcome of [`SessionOrchestrator::recover_sessions`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Sessions registered from the store
    pub recovered: usize,
    /// Sessions that were running or paused and are now `error`
    pub interrupted: Vec<Uuid>,
    /// Session files that could not be read
    pub unreadable: usize,
}

/// Learning session orchestrator service
pub struct SessionOrchestrator {
    ctx: PipelineContext,
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionOrchestrator {
    /// Create a new orchestrator
    ///
    /// # Arguments
    /// * `store` - Durable session store
    /// * `search` - Search provider used during collection
    /// * `scoring` - Scoring service used for deep analysis
    /// * `prefilter` - Shared pre-filter engine (holds the score cache)
    /// * `pipeline` - Pipeline parameters applied to every session
    /// * `event_bus` - Event bus for lifecycle and progress events
    pub fn new(
        store: Arc<dyn SessionStore>,
        search: Arc<dyn SearchProvider>,
        scoring: Arc<dyn ScoringService>,
        prefilter: Arc<PreFilterEngine>,
        pipeline: PipelineConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            ctx: PipelineContext {
                store,
                search,
                scoring,
                prefilter,
                pipeline: Arc::new(pipeline),
                progress: Arc::new(ProgressNotifier::new(event_bus)),
            },
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn prefilter(&self) -> &Arc<PreFilterEngine> {
        &self.ctx.prefilter
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.ctx.pipeline
    }

    pub fn event_bus(&self) -> &EventBus {
        self.ctx.progress.event_bus()
    }

    async fn handle(&self, session_id: Uuid) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    /// Validate, persist and register a new session in `ready` state
    pub async fn create_session(&self, request: NewSession) -> Result<Uuid> {
        let config = request.into_config()?;
        let session = Session::new(config);
        let session_id = session.session_id;

        self.ctx.store.save_metadata(&session).await?;

        tracing::info!(
            session_id = %session_id,
            topic = %session.config.topic,
            depth = session.config.depth_level,
            parent = ?session.config.parent_session_id,
            "Session created"
        );
        self.ctx.progress.emit(LearningEvent::SessionCreated {
            session_id,
            topic: session.config.topic.clone(),
            timestamp: Utc::now(),
        });

        self.sessions
            .write()
            .await
            .insert(session_id, SessionHandle::new(session));
        Ok(session_id)
    }

    /// Create a `ready` session repeating a parent's configuration
    ///
    /// `topic` replaces the parent's topic when given.
    pub async fn create_follow_up_session(&self, parent_id: Uuid, topic: Option<String>) -> Result<Uuid> {
        let parent = self.handle(parent_id).await?.snapshot().await.config;

        let request = NewSession {
            topic: topic.unwrap_or(parent.topic),
            learning_type: parent.learning_type,
            depth_level: parent.depth_level,
            time_limit_secs: parent.time_limit_secs,
            budget_limit: parent.budget_limit,
            tags: parent.tags,
            parent_session_id: Some(parent_id),
        };
        self.create_session(request).await
    }

    /// Move a `ready` session to `running` and spawn its worker
    ///
    /// Returns as soon as the worker is spawned.
    pub async fn start_session(&self, session_id: Uuid) -> Result<()> {
        let handle = self.handle(session_id).await?;

        let mut session = handle.session.lock().await;
        if session.state.status != SessionStatus::Ready {
            return Err(Error::InvalidState(format!(
                "session {} is {}, only ready sessions can be started",
                session_id,
                session.state.status.as_str()
            )));
        }
        let mut started = session.clone();
        started.state.transition_to(SessionStatus::Running)?;
        self.ctx.store.save_metadata(&started).await?;
        *session = started;

        let runner = SessionRunner::new(self.ctx.clone(), handle.clone(), &session);
        let topic = session.config.topic.clone();
        drop(session);

        let task = tokio::spawn(runner.run());
        *handle.task.lock().await = Some(task);

        self.ctx.progress.emit(LearningEvent::SessionStarted {
            session_id,
            topic,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Ask a running session to wait at its next checkpoint
    pub async fn pause_session(&self, session_id: Uuid) -> Result<()> {
        self.set_paused(session_id, true).await?;
        tracing::info!(session_id = %session_id, "Session paused");
        self.ctx.progress.emit(LearningEvent::SessionPaused {
            session_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn resume_session(&self, session_id: Uuid) -> Result<()> {
        self.set_paused(session_id, false).await?;
        tracing::info!(session_id = %session_id, "Session resumed");
        self.ctx.progress.emit(LearningEvent::SessionResumed {
            session_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn set_paused(&self, session_id: Uuid, paused: bool) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let (from, to) = if paused {
            (SessionStatus::Running, SessionStatus::Paused)
        } else {
            (SessionStatus::Paused, SessionStatus::Running)
        };

        let mut session = handle.session.lock().await;
        if session.state.status != from {
            return Err(Error::InvalidState(format!(
                "session {} is {}, expected {}",
                session_id,
                session.state.status.as_str(),
                from.as_str()
            )));
        }
        let mut updated = session.clone();
        updated.state.transition_to(to)?;
        self.ctx.store.save_metadata(&updated).await?;
        *session = updated;
        handle.control.set_paused(paused);
        Ok(())
    }

    /// Request an operator stop; the worker exits at its next checkpoint
    ///
    /// The session ends `completed` with `truncated = true` once the worker
    /// has flushed the current phase.
    pub async fn stop_session(&self, session_id: Uuid) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let status = handle.session.lock().await.state.status;
        if !matches!(status, SessionStatus::Running | SessionStatus::Paused) {
            return Err(Error::InvalidState(format!(
                "session {} is {}, only running or paused sessions can be stopped",
                session_id,
                status.as_str()
            )));
        }

        handle.control.request_stop();
        tracing::info!(session_id = %session_id, "Session stop requested");
        Ok(())
    }

    pub async fn get_session_status(&self, session_id: Uuid) -> Result<SessionStatusReport> {
        Ok(self.get_session(session_id).await?.status_report())
    }

    /// Snapshot of a registered session
    pub async fn get_session(&self, session_id: Uuid) -> Result<Session> {
        Ok(self.handle(session_id).await?.snapshot().await)
    }

    /// Status of every registered session, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionStatusReport> {
        let handles: Vec<Arc<SessionHandle>> = self.sessions.read().await.values().cloned().collect();

        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            sessions.push(handle.snapshot().await);
        }
        sessions.sort_by_key(|s| s.config.created_at);
        sessions.iter().map(Session::status_report).collect()
    }

    pub async fn add_progress_callback(&self, callback: ProgressCallback) {
        self.ctx.progress.add_callback(callback).await;
    }

    /// Wait for a started session's worker to finish and return its final state
    pub async fn wait_for_completion(&self, session_id: Uuid) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        if handle.snapshot().await.state.status == SessionStatus::Ready {
            return Err(Error::InvalidState(format!("session {} has not been started", session_id)));
        }

        handle.control.wait_done().await;

        let task = handle.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(session_id = %session_id, error = %e, "Session worker task failed");
            }
        }
        Ok(handle.snapshot().await)
    }

    /// Persisted session document
    pub async fn load_session_file(&self, session_id: Uuid) -> Result<SessionFile> {
        self.ctx
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session file for {}", session_id)))
    }

    /// Pre-filter statistics of a session, `None` before the phase produced output
    pub async fn filtering_summary(&self, session_id: Uuid) -> Result<Option<FilterSummary>> {
        let file = self.load_session_file(session_id).await?;
        let output: Option<PreprocessingSummary> = file.phase(PhaseKey::PreprocessingSummary)?;
        Ok(output.map(|o| o.summary))
    }

    /// Register persisted sessions; sessions caught mid-run become `error`
    pub async fn recover_sessions(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for session_id in self.ctx.store.list_session_ids().await? {
            if self.sessions.read().await.contains_key(&session_id) {
                continue;
            }

            let file = match self.ctx.store.load(session_id).await {
                Ok(Some(file)) => file,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping unreadable session file");
                    report.unreadable += 1;
                    continue;
                }
            };
            let Some(mut session) = file.session_metadata else {
                tracing::warn!(session_id = %session_id, "Session file has no metadata, skipping");
                report.unreadable += 1;
                continue;
            };

            if matches!(session.state.status, SessionStatus::Running | SessionStatus::Paused) {
                session.state.error_message = Some(INTERRUPTED_BY_RESTART.to_string());
                session.state.transition_to(SessionStatus::Error)?;
                self.ctx.store.save_metadata(&session).await?;
                tracing::warn!(session_id = %session_id, "Session interrupted by restart, marked as error");
                report.interrupted.push(session_id);
            }

            let is_terminal = session.state.status.is_terminal();
            let handle = SessionHandle::new(session);
            if is_terminal {
                handle.control.mark_done();
            }
            self.sessions.write().await.insert(session_id, handle);
            report.recovered += 1;
        }

        tracing::info!(
            recovered = report.recovered,
            interrupted = report.interrupted.len(),
            unreadable = report.unreadable,
            "Session recovery complete"
        );
        Ok(report)
    }

    /// Stop every active session and wait for the workers to persist
    pub async fn shutdown(&self) {
        let handles: Vec<(Uuid, Arc<SessionHandle>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect();

        for (session_id, handle) in handles {
            if handle.control.is_done() || handle.task.lock().await.is_none() {
                continue;
            }
            handle.control.request_stop();
            if let Err(e) = self.wait_for_completion(session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "Session did not shut down cleanly");
            }
        }
    }
}
