//! Testing utilities for ASO workspace
//!
//! Scripted in-memory backend and result sources.

#![allow(missing_docs)]

use aso_core::{ResultSource, SessionBackend, SourceError, StatusSource};
use aso_session::{SessionId, SessionRecord, SessionStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub type Scripted = Result<SessionRecord, SourceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Create,
    Status,
    Analyze,
    Retry,
    Delete,
}

#[derive(Debug, Default)]
struct Script {
    create: VecDeque<Scripted>,
    analyze: VecDeque<Scripted>,
    retry: VecDeque<Scripted>,
    status: HashMap<SessionId, VecDeque<Scripted>>,
    delete: VecDeque<Result<(), SourceError>>,
    /// Last record handed out per session, repeated once a status script runs dry
    last: HashMap<SessionId, SessionRecord>,
    status_delay: Duration,
    trigger_delay: Duration,
}

/// Backend answering from per-operation scripts
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
    calls: Mutex<HashMap<Call, usize>>,
    status_in_flight: AtomicUsize,
    max_status_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(&self, response: Scripted) -> &Self {
        self.script.lock().create.push_back(response);
        self
    }

    pub fn on_analyze(&self, response: Scripted) -> &Self {
        self.script.lock().analyze.push_back(response);
        self
    }

    pub fn on_retry(&self, response: Scripted) -> &Self {
        self.script.lock().retry.push_back(response);
        self
    }

    pub fn on_status(&self, id: impl Into<SessionId>, response: Scripted) -> &Self {
        self.script
            .lock()
            .status
            .entry(id.into())
            .or_default()
            .push_back(response);
        self
    }

    pub fn on_delete(&self, response: Result<(), SourceError>) -> &Self {
        self.script.lock().delete.push_back(response);
        self
    }

    /// Every status query takes `delay` before answering
    pub fn set_status_delay(&self, delay: Duration) {
        self.script.lock().status_delay = delay;
    }

    /// Every analyze and retry call takes `delay` before answering
    pub fn set_trigger_delay(&self, delay: Duration) {
        self.script.lock().trigger_delay = delay;
    }

    #[must_use]
    pub fn calls(&self, call: Call) -> usize {
        self.calls.lock().get(&call).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn max_concurrent_status(&self) -> usize {
        self.max_status_in_flight.load(Ordering::SeqCst)
    }

    fn record_call(&self, call: Call) {
        *self.calls.lock().entry(call).or_insert(0) += 1;
    }

    async fn trigger_pause(&self) {
        let delay = self.script.lock().trigger_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn remember(&self, response: Scripted) -> Scripted {
        if let Ok(record) = &response {
            self.script
                .lock()
                .last
                .insert(record.id.clone(), record.clone());
        }
        response
    }

    fn next_for(&self, call: Call, id: Option<&SessionId>) -> Scripted {
        let mut script = self.script.lock();
        let queued = match call {
            Call::Create => script.create.pop_front(),
            Call::Analyze => script.analyze.pop_front(),
            Call::Retry => script.retry.pop_front(),
            Call::Status => id.and_then(|id| script.status.get_mut(id)?.pop_front()),
            Call::Delete => None,
        };
        queued.unwrap_or_else(|| {
            id.and_then(|id| script.last.get(id).cloned())
                .ok_or(SourceError::NotFound)
        })
    }
}

#[async_trait]
impl StatusSource for ScriptedBackend {
    async fn status(&self, id: &SessionId) -> Result<SessionRecord, SourceError> {
        self.record_call(Call::Status);
        let now = self.status_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_status_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.script.lock().status_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.status_in_flight.fetch_sub(1, Ordering::SeqCst);

        let response = self.next_for(Call::Status, Some(id));
        self.remember(response)
    }
}

#[async_trait]
impl SessionBackend for ScriptedBackend {
    async fn create(&self, _params: &Value) -> Result<SessionRecord, SourceError> {
        self.record_call(Call::Create);
        let response = self.next_for(Call::Create, None);
        self.remember(response)
    }

    async fn analyze(&self, id: &SessionId) -> Result<SessionRecord, SourceError> {
        self.record_call(Call::Analyze);
        self.trigger_pause().await;
        let response = self.next_for(Call::Analyze, Some(id));
        self.remember(response)
    }

    async fn retry(&self, id: &SessionId) -> Result<SessionRecord, SourceError> {
        self.record_call(Call::Retry);
        self.trigger_pause().await;
        let response = self.next_for(Call::Retry, Some(id));
        self.remember(response)
    }

    async fn delete(&self, _id: &SessionId) -> Result<(), SourceError> {
        self.record_call(Call::Delete);
        self.script.lock().delete.pop_front().unwrap_or(Ok(()))
    }
}

/// Result source returning a fixed payload
#[derive(Debug)]
pub struct StaticResultSource {
    name: String,
    outcome: Result<Value, SourceError>,
    fetches: AtomicUsize,
}

impl StaticResultSource {
    #[must_use]
    pub fn new(name: impl Into<String>, outcome: Result<Value, SourceError>) -> Self {
        Self {
            name: name.into(),
            outcome,
            fetches: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultSource for StaticResultSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _id: &SessionId) -> Result<Value, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Fresh unique session id
#[must_use]
pub fn session_id() -> SessionId {
    SessionId::new(ulid::Ulid::new().to_string())
}

#[must_use]
pub fn running(id: &SessionId, step: u32, total: u32) -> SessionRecord {
    SessionRecord::new(id.clone(), SessionStatus::Running).with_progress(step, total)
}

#[must_use]
pub fn ready(id: &SessionId) -> SessionRecord {
    SessionRecord::new(id.clone(), SessionStatus::Ready)
}

#[must_use]
pub fn failed(id: &SessionId, message: &str) -> SessionRecord {
    SessionRecord::new(id.clone(), SessionStatus::Failed).with_error(message)
}

#[must_use]
pub fn draft(id: &SessionId) -> SessionRecord {
    SessionRecord::new(id.clone(), SessionStatus::Draft)
}
