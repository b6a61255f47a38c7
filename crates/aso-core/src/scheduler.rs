//! Poll scheduler
//!
//! Owns at most one polling loop per session identifier:
//! - starting a loop for an identifier that already has one replaces it
//!   (the old loop is cancelled, the timer restarts)
//! - a per-identifier query gate guarantees at most one status query in
//!   flight, across loop generations and manual refreshes
//! - a tick whose query is still in flight when the next tick fires is
//!   skipped, never run concurrently
//! - responses that arrive after cancellation are discarded
//! - query errors are reported to the observer, then swallowed; the loop
//!   keeps going
//! - a terminal response the observer accepts is delivered once, then the
//!   loop ends itself

use crate::error::SourceError;
use crate::source::StatusSource;
use aso_session::{SessionId, SessionRecord};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest period a loop will run at, whatever the configured bounds
pub const POLL_FLOOR: Duration = Duration::from_millis(100);

/// Identifies one polling loop generation for a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollTicket {
    /// Session polled
    pub id: SessionId,
    /// Loop generation, unique per scheduler
    pub generation: u64,
}

/// Receives the results of a polling loop
///
/// Callbacks run on the loop's task while the session's query gate is
/// held, so they are never invoked concurrently for one session.
pub trait PollObserver: Send + Sync + 'static {
    /// A status response arrived.
    ///
    /// Returns whether the session is now terminal. The loop stops only
    /// then, so a refused terminal response keeps it polling.
    fn on_update(&self, ticket: &PollTicket, record: SessionRecord) -> bool;

    /// The status query for this tick failed
    fn on_error(&self, _ticket: &PollTicket, _error: &SourceError) {}

    /// The response just delivered was terminal; the loop has stopped
    fn on_terminal(&self, ticket: &PollTicket);
}

#[derive(Debug)]
struct LoopEntry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Registry {
    loops: Mutex<HashMap<SessionId, LoopEntry>>,
    gates: DashMap<SessionId, Arc<tokio::sync::Mutex<()>>>,
    next_generation: AtomicU64,
}

impl Registry {
    fn gate(&self, id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.gates.entry(id.clone()).or_default().value())
    }

    /// Remove the entry if it still belongs to `ticket`
    fn finish(&self, ticket: &PollTicket) -> bool {
        let mut loops = self.loops.lock();
        match loops.get(&ticket.id) {
            Some(entry) if entry.generation == ticket.generation => {
                loops.remove(&ticket.id);
                true
            }
            _ => false,
        }
    }
}

/// Periodic status poller, one loop per session identifier
pub struct PollScheduler<S: StatusSource + ?Sized> {
    source: Arc<S>,
    registry: Arc<Registry>,
    min_interval: Duration,
    max_interval: Duration,
}

impl<S: StatusSource + ?Sized> std::fmt::Debug for PollScheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("active", &self.active_count())
            .field("min_interval", &self.min_interval)
            .field("max_interval", &self.max_interval)
            .finish_non_exhaustive()
    }
}

impl<S: StatusSource + ?Sized> PollScheduler<S> {
    /// Create a scheduler with the default 1–5 second interval bounds
    #[must_use]
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            registry: Arc::new(Registry::default()),
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
        }
    }

    /// With accepted interval bounds; `min` is raised to [`POLL_FLOOR`]
    #[inline]
    #[must_use]
    pub fn with_interval_bounds(mut self, min: Duration, max: Duration) -> Self {
        let min = min.max(POLL_FLOOR);
        self.min_interval = min;
        self.max_interval = max.max(min);
        self
    }

    /// Start polling `id` every `interval`.
    ///
    /// The interval is clamped into the scheduler's bounds. If `id`
    /// already has a loop it is cancelled and replaced, so at most one
    /// loop exists per identifier. The first query fires one interval
    /// after the call. Must be called from within a tokio runtime.
    pub fn start(
        &self,
        id: SessionId,
        interval: Duration,
        observer: Arc<dyn PollObserver>,
    ) -> PollTicket {
        let period = self.clamp(&id, interval);
        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let ticket = PollTicket { id: id.clone(), generation };
        let token = CancellationToken::new();

        let previous = self.registry.loops.lock().insert(
            id.clone(),
            LoopEntry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            tracing::debug!(session_id = %id, generation, "restarting poll loop");
        } else {
            tracing::info!(session_id = %id, generation, ?period, "poll loop started");
        }

        let ctx = LoopContext {
            source: Arc::clone(&self.source),
            registry: Arc::clone(&self.registry),
            gate: self.registry.gate(&id),
            ticket: ticket.clone(),
            token,
            observer,
        };
        tokio::spawn(ctx.run(period));
        ticket
    }

    /// Stop polling `id`. Safe to call repeatedly or for unknown ids.
    ///
    /// A query already in flight completes, but its response is discarded.
    pub fn stop(&self, id: &SessionId) -> bool {
        let entry = self.registry.loops.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(
                    session_id = %id,
                    generation = entry.generation,
                    "poll loop stopped"
                );
                true
            }
            None => false,
        }
    }

    /// Stop every loop
    pub fn stop_all(&self) {
        let drained: Vec<_> = self.registry.loops.lock().drain().collect();
        for (id, entry) in drained {
            entry.token.cancel();
            tracing::debug!(session_id = %id, "poll loop stopped");
        }
    }

    /// Whether `id` has a live loop
    #[inline]
    #[must_use]
    pub fn is_active(&self, id: &SessionId) -> bool {
        self.registry.loops.lock().contains_key(id)
    }

    /// Whether `ticket` is the live loop for its session
    #[inline]
    #[must_use]
    pub fn is_current(&self, ticket: &PollTicket) -> bool {
        self.registry
            .loops
            .lock()
            .get(&ticket.id)
            .is_some_and(|entry| entry.generation == ticket.generation)
    }

    /// Number of live loops
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.loops.lock().len()
    }

    /// Gate serializing status queries for `id`.
    ///
    /// Manual one-shot queries must hold it while querying and applying
    /// the response.
    #[must_use]
    pub fn query_gate(&self, id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        self.registry.gate(id)
    }

    /// Drop bookkeeping for `id` once nothing references its gate
    pub fn forget(&self, id: &SessionId) {
        self.stop(id);
        self.registry
            .gates
            .remove_if(id, |_, gate| Arc::strong_count(gate) == 1);
    }

    fn clamp(&self, id: &SessionId, requested: Duration) -> Duration {
        let period = requested.clamp(self.min_interval, self.max_interval);
        if period != requested {
            tracing::warn!(
                session_id = %id,
                ?requested,
                ?period,
                "poll interval outside accepted bounds, clamped"
            );
        }
        period
    }
}

impl<S: StatusSource + ?Sized> Drop for PollScheduler<S> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

struct LoopContext<S: StatusSource + ?Sized> {
    source: Arc<S>,
    registry: Arc<Registry>,
    gate: Arc<tokio::sync::Mutex<()>>,
    ticket: PollTicket,
    token: CancellationToken,
    observer: Arc<dyn PollObserver>,
}

impl<S: StatusSource + ?Sized> LoopContext<S> {
    async fn run(self, period: Duration) {
        let id = &self.ticket.id;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Ok(_permit) = Arc::clone(&self.gate).try_lock_owned() else {
                tracing::debug!(session_id = %id, "status query still in flight, tick skipped");
                continue;
            };
            if self.token.is_cancelled() {
                break;
            }

            tracing::debug!(session_id = %id, generation = self.ticket.generation, "poll tick");
            let result = self.source.status(id).await;

            if self.token.is_cancelled() {
                tracing::debug!(session_id = %id, "discarding status response after cancellation");
                break;
            }

            match result {
                Ok(record) => {
                    if self.observer.on_update(&self.ticket, record) {
                        self.registry.finish(&self.ticket);
                        self.observer.on_terminal(&self.ticket);
                        tracing::info!(
                            session_id = %id,
                            "terminal status reached, poll loop finished"
                        );
                        break;
                    }
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::debug!(
                            session_id = %id,
                            error = %err,
                            "transient poll error ignored"
                        );
                    } else {
                        tracing::warn!(session_id = %id, error = %err, "poll error ignored");
                    }
                    self.observer.on_error(&self.ticket, &err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aso_session::SessionStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Answers from a queue, then `running` forever
    #[derive(Default)]
    struct QueueSource {
        queue: Mutex<VecDeque<Result<SessionStatus, SourceError>>>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl QueueSource {
        fn with(responses: Vec<Result<SessionStatus, SourceError>>) -> Self {
            Self {
                queue: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for QueueSource {
        async fn status(&self, id: &SessionId) -> Result<SessionRecord, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next = self.queue.lock().pop_front().unwrap_or(Ok(SessionStatus::Running));
            next.map(|status| SessionRecord::new(id.clone(), status))
        }
    }

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<SessionStatus>>,
        errors: AtomicUsize,
        terminals: AtomicUsize,
        /// Refuse every response, as a store holding a different record would
        refuse: bool,
    }

    impl PollObserver for Recorder {
        fn on_update(&self, _ticket: &PollTicket, record: SessionRecord) -> bool {
            self.updates.lock().push(record.status);
            !self.refuse && record.is_terminal()
        }

        fn on_error(&self, _ticket: &PollTicket, _error: &SourceError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_terminal(&self, _ticket: &PollTicket) {
            self.terminals.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sid() -> SessionId {
        SessionId::new("s-1")
    }

    #[tokio::test(start_paused = true)]
    async fn stops_itself_on_terminal_status() {
        let source = Arc::new(QueueSource::with(vec![
            Ok(SessionStatus::Running),
            Ok(SessionStatus::Running),
            Ok(SessionStatus::Ready),
        ]));
        let scheduler = PollScheduler::new(Arc::clone(&source));
        let recorder = Arc::new(Recorder::default());

        scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(source.calls(), 3);
        assert_eq!(
            *recorder.updates.lock(),
            vec![SessionStatus::Running, SessionStatus::Running, SessionStatus::Ready]
        );
        assert_eq!(recorder.terminals.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_active(&sid()));
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_keeps_one_loop() {
        let source = Arc::new(QueueSource::default());
        let scheduler = PollScheduler::new(Arc::clone(&source));
        let recorder = Arc::new(Recorder::default());

        let first = scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        let second = scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        assert_eq!(scheduler.active_count(), 1);
        assert!(!scheduler.is_current(&first));
        assert!(scheduler.is_current(&second));
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_do_not_stop_the_loop() {
        let source = Arc::new(QueueSource::with(vec![
            Err(SourceError::Unreachable("connection reset".to_string())),
            Err(SourceError::Timeout),
            Ok(SessionStatus::Running),
            Ok(SessionStatus::Failed),
        ]));
        let scheduler = PollScheduler::new(Arc::clone(&source));
        let recorder = Arc::new(Recorder::default());

        scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(source.calls(), 4);
        assert_eq!(
            *recorder.updates.lock(),
            vec![SessionStatus::Running, SessionStatus::Failed]
        );
        assert_eq!(recorder.terminals.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_terminal_response_keeps_polling() {
        let source = Arc::new(QueueSource::with(vec![Ok(SessionStatus::Ready)]));
        let scheduler = PollScheduler::new(Arc::clone(&source));
        let recorder = Arc::new(Recorder {
            refuse: true,
            ..Recorder::default()
        });

        scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(source.calls(), 3);
        assert_eq!(recorder.terminals.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_active(&sid()));
    }

    #[tokio::test(start_paused = true)]
    async fn response_after_stop_is_discarded() {
        let source = Arc::new(QueueSource::slow(Duration::from_secs(3)));
        let scheduler = PollScheduler::new(Arc::clone(&source));
        let recorder = Arc::new(Recorder::default());

        scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(source.calls(), 1);

        assert!(scheduler.stop(&sid()));
        assert!(!scheduler.stop(&sid()));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(source.calls(), 1);
        assert!(recorder.updates.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_queries_never_overlap() {
        let source = Arc::new(QueueSource::slow(Duration::from_millis(2_500)));
        let scheduler = PollScheduler::new(Arc::clone(&source));
        let recorder = Arc::new(Recorder::default());

        scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        // Restart while the first query is in flight.
        scheduler.start(sid(), Duration::from_secs(1), recorder.clone());
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(source.calls() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn short_interval_is_clamped() {
        let source = Arc::new(QueueSource::default());
        let scheduler = PollScheduler::new(Arc::clone(&source));

        scheduler.start(sid(), Duration::from_millis(10), Arc::new(Recorder::default()));
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_bounds_fall_back_to_floor() {
        let source = Arc::new(QueueSource::default());
        let scheduler = PollScheduler::new(Arc::clone(&source))
            .with_interval_bounds(Duration::ZERO, Duration::ZERO);

        scheduler.start(sid(), Duration::ZERO, Arc::new(Recorder::default()));
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(source.calls(), 3);
        assert!(scheduler.is_active(&sid()));
    }

    #[tokio::test(start_paused = true)]
    async fn forget_releases_idle_gate() {
        let source = Arc::new(QueueSource::default());
        let scheduler = PollScheduler::new(Arc::clone(&source));

        scheduler.start(sid(), Duration::from_secs(1), Arc::new(Recorder::default()));
        scheduler.forget(&sid());
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!scheduler.is_active(&sid()));
        assert_eq!(source.calls(), 0);
    }
}
