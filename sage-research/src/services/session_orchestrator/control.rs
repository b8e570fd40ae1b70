//! Per-session control signals and the stop-condition gate
//!
//! [`SessionControl`] carries operator intent (stop, pause) from the API to
//! the worker. [`Gate`] evaluates every stop condition at a checkpoint:
//! operator stop, elapsed time, accumulated cost, and blocks while paused.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::{Session, StopReason};

/// Operator signals for one session
pub struct SessionControl {
    stop: CancellationToken,
    paused: watch::Sender<bool>,
    /// Cancelled once the worker has persisted a terminal state
    done: CancellationToken,
}

impl SessionControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            stop: CancellationToken::new(),
            paused,
            done: CancellationToken::new(),
        }
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.send_replace(paused);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn mark_done(&self) {
        self.done.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub async fn wait_done(&self) {
        self.done.cancelled().await;
    }

    /// Block until resumed, stopped or `deadline`
    async fn wait_while_paused(&self, deadline: Instant) {
        let mut rx = self.paused.subscribe();
        tokio::select! {
            _ = rx.wait_for(|paused| !*paused) => {}
            _ = self.stop.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry entry: guarded session state, control signals, worker handle
pub struct SessionHandle {
    pub(super) session: Mutex<Session>,
    pub(super) control: SessionControl,
    pub(super) task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            control: SessionControl::new(),
            task: Mutex::new(None),
        })
    }

    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }
}

/// Stop-condition evaluator for one running session
#[derive(Clone)]
pub struct Gate {
    handle: Arc<SessionHandle>,
    deadline: Instant,
    budget: f64,
}

impl Gate {
    pub fn new(handle: Arc<SessionHandle>, time_limit: Duration, budget: f64) -> Self {
        Self {
            handle,
            deadline: Instant::now() + time_limit,
            budget,
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.handle.control.is_stop_requested()
    }

    /// First unmet condition, waiting out a pause
    ///
    /// `pending_cost` is spend not yet folded into the session state.
    pub async fn check(&self, pending_cost: f64) -> Option<StopReason> {
        loop {
            if self.handle.control.is_stop_requested() {
                return Some(StopReason::OperatorStop);
            }
            if Instant::now() >= self.deadline {
                return Some(StopReason::TimeLimit);
            }
            let cost = self.handle.session.lock().await.state.total_cost + pending_cost;
            if cost >= self.budget {
                return Some(StopReason::BudgetLimit);
            }
            if !self.handle.control.is_paused() {
                return None;
            }

            let session_id = self.handle.session.lock().await.session_id;
            tracing::info!(session_id = %session_id, "Session paused at checkpoint");
            self.handle.control.wait_while_paused(self.deadline).await;
        }
    }

    /// Run `fut`, abandoning it at the deadline or on operator stop
    pub async fn bounded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.handle.control.stop.cancelled() => None,
            result = tokio::time::timeout_at(self.deadline, fut) => result.ok(),
        }
    }

    /// Resolves at the deadline or on operator stop
    pub async fn expired(&self) {
        tokio::select! {
            _ = self.handle.control.stop.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// Sleep that ends early at the deadline or on operator stop
    pub async fn sleep(&self, duration: Duration) {
        self.bounded(tokio::time::sleep(duration)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSession;

    fn handle(budget: f64) -> Arc<SessionHandle> {
        let config = NewSession::new("gates", Duration::from_secs(10), budget)
            .into_config()
            .unwrap();
        SessionHandle::new(Session::new(config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_reports_time_limit() {
        let gate = Gate::new(handle(1.0), Duration::from_secs(10), 1.0);
        assert_eq!(gate.check(0.0).await, None);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(gate.check(0.0).await, Some(StopReason::TimeLimit));
    }

    #[tokio::test]
    async fn test_gate_reports_budget_including_pending() {
        let h = handle(1.0);
        let gate = Gate::new(h.clone(), Duration::from_secs(10), 1.0);
        h.session.lock().await.state.total_cost = 0.6;
        assert_eq!(gate.check(0.3).await, None);
        assert_eq!(gate.check(0.4).await, Some(StopReason::BudgetLimit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_blocks_until_resume() {
        let h = handle(1.0);
        let gate = Gate::new(h.clone(), Duration::from_secs(60), 1.0);
        h.control.set_paused(true);

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.check(0.0).await }
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        h.control.set_paused(false);
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_ends_at_deadline() {
        let h = handle(1.0);
        let gate = Gate::new(h.clone(), Duration::from_secs(10), 1.0);
        h.control.set_paused(true);
        assert_eq!(gate.check(0.0).await, Some(StopReason::TimeLimit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_abandons_hung_future_at_deadline() {
        let gate = Gate::new(handle(1.0), Duration::from_secs(10), 1.0);
        let start = Instant::now();
        let result = gate.bounded(tokio::time::sleep(Duration::from_secs(20))).await;
        assert!(result.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_resolves_on_stop_or_deadline() {
        let h = handle(1.0);
        let gate = Gate::new(h.clone(), Duration::from_secs(30), 1.0);
        let start = Instant::now();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.expired().await }
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());
        h.control.request_stop();
        waiter.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(30));

        let gate = Gate::new(handle(1.0), Duration::from_secs(10), 1.0);
        let start = Instant::now();
        gate.expired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_stop_wins_over_everything() {
        let h = handle(1.0);
        let gate = Gate::new(h.clone(), Duration::from_secs(10), 1.0);
        h.control.set_paused(true);
        h.control.request_stop();
        assert_eq!(gate.check(5.0).await, Some(StopReason::OperatorStop));
        assert!(gate.bounded(async { 1 }).await.is_none());
    }
}
