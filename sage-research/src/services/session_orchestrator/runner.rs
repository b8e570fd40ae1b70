//! Background worker for one session
//!
//! Owns the session's mutable state for the duration of the run. Every unit
//! of work (query, sub-batch, analysis batch) is preceded by a checkpoint;
//! partial phase output is persisted as it accumulates.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use uuid::Uuid;

use sage_common::events::LearningEvent;

use super::control::{Gate, SessionHandle};
use super::PipelineContext;
use crate::models::{Phase, Session, SessionConfig, SessionStatus, StopReason};

/// Recorded for work cut off by the deadline or an operator stop
pub(super) const ABANDONED: &str = "abandoned: session limit reached";

pub(super) struct SessionRunner {
    pub(super) ctx: PipelineContext,
    pub(super) handle: Arc<SessionHandle>,
    pub(super) session_id: Uuid,
    pub(super) config: SessionConfig,
    pub(super) gate: Gate,
    /// First limit or stop observed; sticky for the rest of the run
    pub(super) halted: Option<StopReason>,
}

impl SessionRunner {
    pub(super) fn new(ctx: PipelineContext, handle: Arc<SessionHandle>, session: &Session) -> Self {
        let gate = Gate::new(
            handle.clone(),
            session.config.time_limit(),
            session.config.budget_limit,
        );
        Self {
            ctx,
            handle,
            session_id: session.session_id,
            config: session.config.clone(),
            gate,
            halted: None,
        }
    }

    /// Task body: execute, then persist the terminal state whatever happened
    pub(super) async fn run(mut self) {
        tracing::info!(
            session_id = %self.session_id,
            topic = %self.config.topic,
            depth = self.config.depth_level,
            time_limit_secs = self.config.time_limit_secs,
            budget_limit = self.config.budget_limit,
            "Session worker started"
        );

        let outcome = AssertUnwindSafe(self.execute()).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(format!("{:#}", e)).await,
            Err(panic) => self.fail(format!("panic: {}", panic_message(&*panic))).await,
        }

        self.handle.control.mark_done();
    }

    async fn execute(&mut self) -> Result<()> {
        let collection = self.phase_collection().await?;
        if self.observe_stop().await? {
            return self.finish().await;
        }

        let selected = self.phase_prefilter(&collection).await?;
        if self.observe_stop().await? {
            return self.finish().await;
        }

        let analysis = self.phase_analysis(&selected).await?;
        if self.observe_stop().await? {
            return self.finish().await;
        }

        self.phase_integration(&selected, &analysis).await?;
        self.finish().await
    }

    /// Evaluate stop conditions; `Some` means no further unit of work may start
    pub(super) async fn checkpoint(&mut self, pending_cost: f64) -> Result<Option<StopReason>> {
        if let Some(reason) = self.halted {
            return Ok(Some(reason));
        }
        match self.gate.check(pending_cost).await {
            Some(reason) => {
                self.halt(reason).await?;
                Ok(Some(reason))
            }
            None => Ok(None),
        }
    }

    /// True once an operator stop has been requested (recording it if new)
    async fn observe_stop(&mut self) -> Result<bool> {
        if self.halted == Some(StopReason::OperatorStop) {
            return Ok(true);
        }
        if self.gate.stop_requested() {
            self.halt(StopReason::OperatorStop).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn halt(&mut self, reason: StopReason) -> Result<()> {
        if self.halted.is_none() {
            self.halted = Some(reason);
        }

        let mut session = self.handle.session.lock().await;
        session.state.mark_truncated(reason);
        // A limit reached while paused ends the pause so the run can wrap up
        if reason != StopReason::OperatorStop && session.state.status == SessionStatus::Paused {
            session.state.transition_to(SessionStatus::Running)?;
            self.handle.control.set_paused(false);
        }
        self.ctx.store.save_metadata(&session).await?;
        drop(session);

        tracing::info!(
            session_id = %self.session_id,
            reason = reason.as_str(),
            "Session limit reached, wrapping up"
        );
        Ok(())
    }

    /// Mutate the guarded state
    pub(super) async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Session),
    {
        let mut session = self.handle.session.lock().await;
        f(&mut session);
    }

    pub(super) async fn save_output<T: Serialize>(&self, phase: Phase, output: &T) -> Result<()> {
        let data = serde_json::to_value(output).context("serializing phase output")?;
        let session = self.handle.session.lock().await;
        self.ctx
            .store
            .save_phase_output(&session, phase.output_key(), data)
            .await
            .with_context(|| format!("persisting {} output", phase))?;
        Ok(())
    }

    pub(super) async fn enter_phase(&self, phase: Phase) -> Result<()> {
        {
            let mut session = self.handle.session.lock().await;
            session.state.current_phase = Some(phase);
            self.ctx.store.save_metadata(&session).await?;
        }

        tracing::info!(session_id = %self.session_id, phase = %phase, "Phase started");
        self.ctx.progress.emit(LearningEvent::PhaseStarted {
            session_id: self.session_id,
            phase: phase.as_str().to_string(),
            timestamp: Utc::now(),
        });
        self.ctx
            .progress
            .notify(self.session_id, phase, 0.0, format!("{} started", phase))
            .await;
        Ok(())
    }

    pub(super) async fn complete_phase(&self, phase: Phase, message: String) {
        tracing::info!(session_id = %self.session_id, phase = %phase, "{}", message);
        self.ctx.progress.notify(self.session_id, phase, 1.0, message).await;
        self.ctx.progress.emit(LearningEvent::PhaseCompleted {
            session_id: self.session_id,
            phase: phase.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    pub(super) async fn notify(&self, phase: Phase, fraction: f64, message: String) {
        self.ctx.progress.notify(self.session_id, phase, fraction, message).await;
    }

    async fn finish(&self) -> Result<()> {
        let mut session = self.handle.session.lock().await;
        let mut snapshot = session.clone();
        snapshot.state.transition_to(SessionStatus::Completed)?;
        self.ctx.store.save_metadata(&snapshot).await?;
        *session = snapshot.clone();
        drop(session);

        tracing::info!(
            session_id = %self.session_id,
            collected = snapshot.state.documents_collected,
            processed = snapshot.state.documents_processed,
            cost = snapshot.state.total_cost,
            findings = snapshot.state.important_findings.len(),
            truncated = snapshot.state.truncated,
            stop_reason = snapshot.state.stop_reason.map(|r| r.as_str()).unwrap_or("none"),
            elapsed_secs = snapshot.state.elapsed_secs(),
            "Session completed"
        );

        self.ctx.progress.emit(LearningEvent::SessionCompleted {
            session_id: self.session_id,
            documents_collected: snapshot.state.documents_collected,
            documents_processed: snapshot.state.documents_processed,
            total_cost: snapshot.state.total_cost,
            truncated: snapshot.state.truncated,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record an unexpected failure; never propagates
    async fn fail(&self, message: String) {
        tracing::error!(session_id = %self.session_id, error = %message, "Session failed");

        let mut session = self.handle.session.lock().await;
        if session.state.status.is_terminal() {
            return;
        }
        session.state.error_message = Some(message.clone());
        if let Err(e) = session.state.transition_to(SessionStatus::Error) {
            tracing::error!(session_id = %self.session_id, error = %e, "Cannot mark session as failed");
            return;
        }
        if let Err(e) = self.ctx.store.save_metadata(&session).await {
            tracing::error!(
                session_id = %self.session_id,
                error = %e,
                "Failed to persist error state"
            );
        }
        drop(session);

        self.ctx.progress.emit(LearningEvent::SessionFailed {
            session_id: self.session_id,
            error: message,
            timestamp: Utc::now(),
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
