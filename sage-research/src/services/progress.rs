//! Progress notification fan-out
//!
//! Registered callbacks receive every [`ProgressUpdate`] synchronously; each
//! update is also published on the [`EventBus`] for SSE clients. A panicking
//! callback is logged and the remaining callbacks still run.

use chrono::Utc;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use sage_common::events::{EventBus, LearningEvent};

use crate::models::Phase;

/// One progress notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub session_id: Uuid,
    pub phase: Phase,
    /// Fraction of the phase completed, 0.0 - 1.0
    pub fraction: f64,
    pub message: String,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

pub struct ProgressNotifier {
    callbacks: RwLock<Vec<ProgressCallback>>,
    event_bus: EventBus,
}

impl ProgressNotifier {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            event_bus,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub async fn add_callback(&self, callback: ProgressCallback) {
        self.callbacks.write().await.push(callback);
    }

    /// Deliver to every callback, then to the event bus
    pub async fn notify(&self, session_id: Uuid, phase: Phase, fraction: f64, message: impl Into<String>) {
        let update = ProgressUpdate {
            session_id,
            phase,
            fraction: if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 },
            message: message.into(),
        };

        let callbacks = self.callbacks.read().await.clone();
        for (index, callback) in callbacks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(&update))).is_err() {
                tracing::error!(
                    session_id = %session_id,
                    callback = index,
                    phase = %phase,
                    "Progress callback panicked"
                );
            }
        }

        tracing::debug!(
            session_id = %session_id,
            phase = %phase,
            fraction = update.fraction,
            message = %update.message,
            "Progress"
        );

        self.event_bus.emit_lossy(LearningEvent::SessionProgress {
            session_id,
            phase: phase.as_str().to_string(),
            progress: update.fraction,
            message: update.message,
            timestamp: Utc::now(),
        });
    }

    /// Publish a lifecycle event
    pub fn emit(&self, event: LearningEvent) {
        self.event_bus.emit_lossy(event);
    }
}
