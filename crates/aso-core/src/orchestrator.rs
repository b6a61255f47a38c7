//! Session orchestrator
//!
//! The single entry point observers use. Owns the session-record store
//! and the poll scheduler; every mutation of a stored record goes through
//! the state machine.
//!
//! # Workflow
//! 1. `create` / `retry` / `analyze` call the backend's trigger side
//! 2. a non-terminal result starts (or restarts) the session's poll loop
//! 3. each poll response is validated and applied, observers are notified
//! 4. a terminal response stops the loop; entering `ready` emits
//!    [`SessionEvent::BecameReady`] exactly once for the run

use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, OrchestratorError, SourceError};
use crate::events::{SessionEvent, SessionSnapshot, StalledSessionWarning, StopReason};
use crate::scheduler::{PollObserver, PollScheduler, PollTicket};
use crate::source::SessionBackend;
use aso_session::{
    SessionId, SessionRecord, SessionStatus, Transition, TransitionCause, TransitionError,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// One tracked session
#[derive(Debug)]
struct Tracked {
    record: SessionRecord,
    watch: watch::Sender<SessionSnapshot>,
    /// Live poll loop, if any
    poll: Option<PollTicket>,
    /// Status when the retry/analyze call now awaiting the backend began
    trigger_from: Option<SessionStatus>,
    run_started: Instant,
    stalled: bool,
}

impl Tracked {
    fn new(record: SessionRecord) -> Self {
        let (watch, _) = watch::channel(SessionSnapshot::new(record.clone()));
        Self {
            record,
            watch,
            poll: None,
            trigger_from: None,
            run_started: Instant::now(),
            stalled: false,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            record: self.record.clone(),
            polling: self.poll.is_some(),
            stalled: self.stalled,
        }
    }

    fn publish(&self) {
        self.watch.send_replace(self.snapshot());
    }

    fn new_run(&mut self) {
        self.run_started = Instant::now();
        self.stalled = false;
    }
}

/// State shared with poll loops
#[derive(Debug)]
struct Shared {
    sessions: Mutex<HashMap<SessionId, Tracked>>,
    events: broadcast::Sender<SessionEvent>,
    stall_after: Duration,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn apply(
        &self,
        tracked: &mut Tracked,
        incoming: SessionRecord,
        cause: TransitionCause,
    ) -> Result<Transition, TransitionError> {
        match tracked.record.apply(incoming, cause) {
            Ok(transition) => {
                self.emit(SessionEvent::Updated(tracked.record.clone()));
                // A trigger starts a new run: an immediate terminal answer enters it.
                let entered = transition.changed() || cause == TransitionCause::Trigger;
                self.announce_terminal(&tracked.record, entered);
                Ok(transition)
            }
            Err(error) => {
                tracing::warn!(
                    session_id = %tracked.record.id,
                    %error,
                    "response refused by state machine, keeping last known record"
                );
                self.emit(SessionEvent::IntegrityViolation {
                    id: tracked.record.id.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn announce_terminal(&self, record: &SessionRecord, entered: bool) {
        if !entered {
            return;
        }
        match record.status {
            SessionStatus::Ready => {
                tracing::info!(session_id = %record.id, "session ready");
                self.emit(SessionEvent::BecameReady(record.clone()));
            }
            SessionStatus::Failed => {
                tracing::info!(
                    session_id = %record.id,
                    error = record.error_message.as_deref().unwrap_or("unknown"),
                    "session failed"
                );
                self.emit(SessionEvent::Failed(record.clone()));
            }
            SessionStatus::Draft | SessionStatus::Running => {}
        }
    }

    fn check_stall(&self, tracked: &mut Tracked) {
        if tracked.stalled || tracked.record.is_terminal() {
            return;
        }
        let elapsed = tracked.run_started.elapsed();
        if elapsed < self.stall_after {
            return;
        }
        tracked.stalled = true;
        tracing::warn!(
            session_id = %tracked.record.id,
            ?elapsed,
            status = %tracked.record.status,
            "session stalled, still polling"
        );
        self.emit(SessionEvent::Stalled(StalledSessionWarning {
            id: tracked.record.id.clone(),
            elapsed,
            status: tracked.record.status,
        }));
    }
}

impl PollObserver for Shared {
    fn on_update(&self, ticket: &PollTicket, record: SessionRecord) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(tracked) = sessions.get_mut(&ticket.id) else {
            tracing::debug!(session_id = %ticket.id, "update for released session discarded");
            return false;
        };
        if tracked.poll.as_ref() != Some(ticket) {
            tracing::debug!(session_id = %ticket.id, "update from superseded poll loop discarded");
            return false;
        }
        let _ = self.apply(tracked, record, TransitionCause::Observed);
        self.check_stall(tracked);
        tracked.publish();
        tracked.record.is_terminal()
    }

    fn on_error(&self, ticket: &PollTicket, _error: &SourceError) {
        let mut sessions = self.sessions.lock();
        let Some(tracked) = sessions.get_mut(&ticket.id) else {
            return;
        };
        if tracked.poll.as_ref() != Some(ticket) || tracked.stalled {
            return;
        }
        self.check_stall(tracked);
        if tracked.stalled {
            tracked.publish();
        }
    }

    fn on_terminal(&self, ticket: &PollTicket) {
        let mut sessions = self.sessions.lock();
        let Some(tracked) = sessions.get_mut(&ticket.id) else {
            return;
        };
        if tracked.poll.as_ref() != Some(ticket) {
            return;
        }
        tracked.poll = None;
        tracked.publish();
        self.emit(SessionEvent::PollStopped {
            id: ticket.id.clone(),
            reason: StopReason::Terminal,
        });
    }
}

/// Tracks analysis sessions against one feature backend
pub struct SessionOrchestrator<B: SessionBackend + ?Sized> {
    backend: Arc<B>,
    config: OrchestratorConfig,
    scheduler: PollScheduler<B>,
    shared: Arc<Shared>,
}

impl<B: SessionBackend + ?Sized> std::fmt::Debug for SessionOrchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("sessions", &self.shared.sessions.lock().len())
            .finish_non_exhaustive()
    }
}

impl<B: SessionBackend + ?Sized> SessionOrchestrator<B> {
    /// Create an orchestrator for `backend`
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when `config` fails
    /// [`OrchestratorConfig::validate`]
    pub fn new(backend: Arc<B>, config: OrchestratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    /// Create with default configuration
    #[inline]
    #[must_use]
    pub fn with_defaults(backend: Arc<B>) -> Self {
        Self::build(backend, OrchestratorConfig::default())
    }

    fn build(backend: Arc<B>, config: OrchestratorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let scheduler = PollScheduler::new(Arc::clone(&backend))
            .with_interval_bounds(config.min_poll_interval(), config.max_poll_interval());
        Self {
            backend,
            scheduler,
            shared: Arc::new(Shared {
                sessions: Mutex::new(HashMap::new()),
                events,
                stall_after: config.stall_after(),
            }),
            config,
        }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Subscribe to events for all sessions
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Watch one session's snapshot; `None` if untracked
    #[must_use]
    pub fn observe(&self, id: &SessionId) -> Option<watch::Receiver<SessionSnapshot>> {
        self.shared.sessions.lock().get(id).map(|t| t.watch.subscribe())
    }

    /// Current snapshot of one session
    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.shared.sessions.lock().get(id).map(Tracked::snapshot)
    }

    /// Identifiers of all tracked sessions
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.shared.sessions.lock().keys().cloned().collect()
    }

    /// Whether a poll loop is live for `id`
    #[inline]
    #[must_use]
    pub fn is_polling(&self, id: &SessionId) -> bool {
        self.scheduler.is_active(id)
    }

    /// Start a new session through the trigger source.
    ///
    /// Polling starts when the returned status is non-terminal.
    ///
    /// # Errors
    /// [`OrchestratorError::Creation`] when the backend is unreachable or
    /// rejects the input; nothing is tracked in that case.
    pub async fn create(&self, params: &Value) -> Result<SessionRecord, OrchestratorError> {
        let record = self
            .backend
            .create(params)
            .await
            .map_err(OrchestratorError::Creation)?;
        tracing::info!(session_id = %record.id, status = %record.status, "session created");

        let mut sessions = self.shared.sessions.lock();
        let tracked = match sessions.entry(record.id.clone()) {
            Entry::Occupied(entry) => {
                tracing::warn!(
                    session_id = %record.id,
                    "backend reused a tracked session id, replacing"
                );
                self.scheduler.stop(&record.id);
                let tracked = entry.into_mut();
                let watch = tracked.watch.clone();
                *tracked = Tracked {
                    watch,
                    ..Tracked::new(record.clone())
                };
                tracked
            }
            Entry::Vacant(entry) => entry.insert(Tracked::new(record.clone())),
        };

        self.shared.emit(SessionEvent::Updated(record.clone()));
        self.shared.announce_terminal(&record, true);
        self.sync_polling(tracked);
        tracked.publish();
        Ok(record)
    }

    /// Adopt an existing backend session: query it once, track it, and
    /// poll while it is non-terminal.
    ///
    /// # Errors
    /// [`OrchestratorError::Status`] when the status query fails.
    pub async fn attach(&self, id: &SessionId) -> Result<SessionRecord, OrchestratorError> {
        let gate = self.scheduler.query_gate(id);
        let _permit = gate.lock_owned().await;

        let record = self
            .backend
            .status(id)
            .await
            .map_err(|source| OrchestratorError::Status {
                id: id.clone(),
                source,
            })?;

        let mut sessions = self.shared.sessions.lock();
        let known = sessions.contains_key(id);
        let tracked = sessions
            .entry(id.clone())
            .or_insert_with(|| Tracked::new(record.clone()));
        if known {
            let _ = self.shared.apply(tracked, record, TransitionCause::Observed);
        } else {
            tracing::info!(session_id = %id, status = %record.status, "session attached");
            self.shared.emit(SessionEvent::Updated(record.clone()));
            // First observation by this client counts as entering the status.
            self.shared.announce_terminal(&record, true);
        }
        if tracked.poll.is_none() || tracked.record.is_terminal() {
            self.sync_polling(tracked);
        }
        self.shared.check_stall(tracked);
        tracked.publish();
        Ok(tracked.record.clone())
    }

    /// Restart a failed session.
    ///
    /// Clears the error message and restarts polling.
    ///
    /// # Errors
    /// - [`OrchestratorError::UnknownSession`] if `id` is not tracked
    /// - [`OrchestratorError::InvalidState`] unless the status is `failed`
    ///   (or another trigger is already awaiting the backend); the record is
    ///   left unchanged
    /// - [`OrchestratorError::Trigger`] when the backend call fails
    pub async fn retry(&self, id: &SessionId) -> Result<SessionRecord, OrchestratorError> {
        let guard = self.begin_trigger(id, "retry", |status| status == SessionStatus::Failed)?;
        tracing::info!(session_id = %id, "retrying session");
        let result = self.backend.retry(id).await;
        guard.disarm();
        self.finish_trigger(id, result)
    }

    /// Start analysis for a draft session, or re-run a finished one.
    ///
    /// Idempotent while the session is `running` and polled: the stored
    /// record is returned without a backend call.
    /// If polling moved the session on while the call was out, the
    /// polled record wins and the trigger answer is dropped.
    ///
    /// # Errors
    /// - [`OrchestratorError::UnknownSession`] if `id` is not tracked
    /// - [`OrchestratorError::InvalidState`] if another trigger is in flight
    /// - [`OrchestratorError::Trigger`] when the backend call fails
    pub async fn analyze(&self, id: &SessionId) -> Result<SessionRecord, OrchestratorError> {
        {
            let sessions = self.shared.sessions.lock();
            let tracked = sessions
                .get(id)
                .ok_or_else(|| OrchestratorError::UnknownSession(id.clone()))?;
            if tracked.record.status == SessionStatus::Running
                && tracked.poll.is_some()
                && tracked.trigger_from.is_none()
            {
                tracing::debug!(session_id = %id, "analysis already running");
                return Ok(tracked.record.clone());
            }
        }
        let guard = self.begin_trigger(id, "analyze", |_| true)?;
        tracing::info!(session_id = %id, "starting analysis");
        let result = self.backend.analyze(id).await;
        guard.disarm();
        self.finish_trigger(id, result)
    }

    /// One-shot status refresh, validated like a poll response.
    ///
    /// Waits for any in-flight poll query for the same session first.
    /// Returns the stored record, which is unchanged if the response was
    /// refused by the state machine.
    ///
    /// # Errors
    /// - [`OrchestratorError::UnknownSession`] if `id` is not tracked
    /// - [`OrchestratorError::Status`] when the query fails
    pub async fn get_status(&self, id: &SessionId) -> Result<SessionRecord, OrchestratorError> {
        if !self.shared.sessions.lock().contains_key(id) {
            return Err(OrchestratorError::UnknownSession(id.clone()));
        }
        let gate = self.scheduler.query_gate(id);
        let _permit = gate.lock_owned().await;

        let record = self
            .backend
            .status(id)
            .await
            .map_err(|source| OrchestratorError::Status {
                id: id.clone(),
                source,
            })?;

        let mut sessions = self.shared.sessions.lock();
        let tracked = sessions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::UnknownSession(id.clone()))?;
        if let Ok(transition) = self.shared.apply(tracked, record, TransitionCause::Observed) {
            if transition.entered_terminal() {
                self.sync_polling(tracked);
            }
        }
        self.shared.check_stall(tracked);
        tracked.publish();
        Ok(tracked.record.clone())
    }

    /// Stop polling `id` without touching its status.
    ///
    /// A response already in flight is discarded when it arrives.
    /// Returns whether a loop was stopped.
    pub fn cancel(&self, id: &SessionId) -> bool {
        let mut sessions = self.shared.sessions.lock();
        let stopped = self.scheduler.stop(id);
        if let Some(tracked) = sessions.get_mut(id) {
            tracked.poll = None;
            tracked.publish();
        }
        if stopped {
            self.shared.emit(SessionEvent::PollStopped {
                id: id.clone(),
                reason: StopReason::Cancelled,
            });
        }
        stopped
    }

    /// Cancel polling and forget `id` locally. Watchers see the channel close.
    pub fn release(&self, id: &SessionId) -> Option<SessionRecord> {
        self.cancel(id);
        let removed = self.shared.sessions.lock().remove(id);
        self.scheduler.forget(id);
        removed.map(|tracked| tracked.record)
    }

    /// Delete the session on the backend, cancelling its poll first.
    ///
    /// # Errors
    /// [`OrchestratorError::Delete`] when the backend call fails; the
    /// record stays tracked (not polled).
    pub async fn delete(&self, id: &SessionId) -> Result<(), OrchestratorError> {
        self.cancel(id);
        self.backend
            .delete(id)
            .await
            .map_err(|source| OrchestratorError::Delete {
                id: id.clone(),
                source,
            })?;
        tracing::info!(session_id = %id, "session deleted");
        self.release(id);
        Ok(())
    }

    /// Stop every poll loop; records stay tracked
    pub fn shutdown(&self) {
        let mut sessions = self.shared.sessions.lock();
        self.scheduler.stop_all();
        for tracked in sessions.values_mut() {
            tracked.poll = None;
            tracked.publish();
        }
    }

    /// Start polling for non-terminal records, stop it for terminal ones
    fn sync_polling(&self, tracked: &mut Tracked) {
        let id = tracked.record.id.clone();
        if tracked.record.is_terminal() {
            if tracked.poll.take().is_some() && self.scheduler.stop(&id) {
                self.shared.emit(SessionEvent::PollStopped {
                    id,
                    reason: StopReason::Terminal,
                });
            }
        } else {
            let observer: Arc<dyn PollObserver> = self.shared.clone();
            tracked.poll = Some(self.scheduler.start(id, self.config.poll_interval(), observer));
        }
    }

    fn begin_trigger(
        &self,
        id: &SessionId,
        operation: &'static str,
        allowed: impl Fn(SessionStatus) -> bool,
    ) -> Result<TriggerGuard<'_>, OrchestratorError> {
        let mut sessions = self.shared.sessions.lock();
        let tracked = sessions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::UnknownSession(id.clone()))?;
        if tracked.trigger_from.is_some() || !allowed(tracked.record.status) {
            return Err(OrchestratorError::InvalidState {
                id: id.clone(),
                status: tracked.record.status,
                operation,
            });
        }
        tracked.trigger_from = Some(tracked.record.status);
        Ok(TriggerGuard {
            shared: &self.shared,
            id: id.clone(),
            armed: true,
        })
    }

    fn finish_trigger(
        &self,
        id: &SessionId,
        result: Result<SessionRecord, SourceError>,
    ) -> Result<SessionRecord, OrchestratorError> {
        let mut sessions = self.shared.sessions.lock();
        let Some(tracked) = sessions.get_mut(id) else {
            tracing::debug!(session_id = %id, "session released while trigger was in flight");
            return result.map_err(|source| OrchestratorError::Trigger {
                id: id.clone(),
                source,
            });
        };
        let started_from = tracked.trigger_from.take();

        let record = result.map_err(|source| OrchestratorError::Trigger {
            id: id.clone(),
            source,
        })?;
        if started_from.is_some_and(|from| from != tracked.record.status) {
            // Polled past the trigger's starting point while the call was out.
            tracing::debug!(
                session_id = %id,
                status = %tracked.record.status,
                "trigger answer older than polled status, discarded"
            );
            if !tracked.record.is_terminal() {
                tracked.new_run();
                if tracked.poll.is_none() {
                    self.sync_polling(tracked);
                }
            }
            tracked.publish();
            return Ok(tracked.record.clone());
        }
        self.shared
            .apply(tracked, record, TransitionCause::Trigger)
            .map_err(|err| OrchestratorError::Trigger {
                id: id.clone(),
                source: SourceError::Protocol(err.to_string()),
            })?;

        tracked.new_run();
        self.sync_polling(tracked);
        tracked.publish();
        Ok(tracked.record.clone())
    }
}

/// Clears `trigger_from` if a retry/analyze future is dropped
/// before the backend answered.
struct TriggerGuard<'a> {
    shared: &'a Shared,
    id: SessionId,
    armed: bool,
}

impl TriggerGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TriggerGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(tracked) = self.shared.sessions.lock().get_mut(&self.id) {
            tracked.trigger_from = None;
        }
    }
}
