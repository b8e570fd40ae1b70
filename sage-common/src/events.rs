//! Event types for the SAGE event system
//!
//! Provides the learning session event definitions and the EventBus used to
//! fan them out to SSE clients and other in-process observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Learning session lifecycle and progress events
///
/// Status and phase are carried as their wire names so that consumers do not
/// depend on the research crate's types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LearningEvent {
    /// Session validated and persisted in `ready` state
    SessionCreated {
        session_id: Uuid,
        topic: String,
        timestamp: DateTime<Utc>,
    },

    /// Background worker started
    SessionStarted {
        session_id: Uuid,
        topic: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline phase began
    PhaseStarted {
        session_id: Uuid,
        phase: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress within a phase
    ///
    /// Emitted after each query, each batch and at phase boundaries.
    SessionProgress {
        session_id: Uuid,
        phase: String,
        /// Fraction of the phase completed (0.0 - 1.0)
        progress: f64,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline phase finished (possibly early)
    PhaseCompleted {
        session_id: Uuid,
        phase: String,
        timestamp: DateTime<Utc>,
    },

    /// Operator paused the session
    SessionPaused {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Operator resumed the session
    SessionResumed {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Session reached `completed`
    SessionCompleted {
        session_id: Uuid,
        documents_collected: usize,
        documents_processed: usize,
        total_cost: f64,
        /// True when a time/budget limit or operator stop cut the run short
        truncated: bool,
        timestamp: DateTime<Utc>,
    },

    /// Session reached `error`
    SessionFailed {
        session_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl LearningEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            LearningEvent::SessionCreated { .. } => "SessionCreated",
            LearningEvent::SessionStarted { .. } => "SessionStarted",
            LearningEvent::PhaseStarted { .. } => "PhaseStarted",
            LearningEvent::SessionProgress { .. } => "SessionProgress",
            LearningEvent::PhaseCompleted { .. } => "PhaseCompleted",
            LearningEvent::SessionPaused { .. } => "SessionPaused",
            LearningEvent::SessionResumed { .. } => "SessionResumed",
            LearningEvent::SessionCompleted { .. } => "SessionCompleted",
            LearningEvent::SessionFailed { .. } => "SessionFailed",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            LearningEvent::SessionCreated { session_id, .. }
            | LearningEvent::SessionStarted { session_id, .. }
            | LearningEvent::PhaseStarted { session_id, .. }
            | LearningEvent::SessionProgress { session_id, .. }
            | LearningEvent::PhaseCompleted { session_id, .. }
            | LearningEvent::SessionPaused { session_id, .. }
            | LearningEvent::SessionResumed { session_id, .. }
            | LearningEvent::SessionCompleted { session_id, .. }
            | LearningEvent::SessionFailed { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for [`LearningEvent`]s
///
/// Cloning is cheap; all clones share one channel. Events emitted before a
/// receiver subscribes are not delivered to it, and slow receivers may lag
/// once `capacity` events are buffered.
///
/// ```
/// use sage_common::events::EventBus;
///
/// let event_bus = EventBus::new(100);
/// let _rx = event_bus.subscribe();
/// assert_eq!(event_bus.subscriber_count(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LearningEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LearningEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LearningEvent,
    ) -> Result<usize, broadcast::error::SendError<LearningEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LearningEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
