//! Collaborator boundaries
//!
//! A feature module's backend supplies:
//! - a [`StatusSource`]: pure, cheap status read used by the poll scheduler
//! - a [`SessionBackend`]: trigger operations (create, analyze, retry, delete)
//! - zero or more [`ResultSource`]s, valid once a session is `ready`

use crate::error::SourceError;
use aso_session::{SessionId, SessionRecord};
use async_trait::async_trait;
use serde_json::Value;

/// Read-only status query
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    /// Current record for `id`
    async fn status(&self, id: &SessionId) -> Result<SessionRecord, SourceError>;
}

/// Trigger side of a feature module's backend
#[async_trait]
pub trait SessionBackend: StatusSource {
    /// Start new work from domain-specific creation parameters
    async fn create(&self, params: &Value) -> Result<SessionRecord, SourceError>;

    /// Start (or re-run) analysis for an existing session
    async fn analyze(&self, id: &SessionId) -> Result<SessionRecord, SourceError>;

    /// Restart a failed session
    async fn retry(&self, id: &SessionId) -> Result<SessionRecord, SourceError>;

    /// Remove the session on the backend
    async fn delete(&self, id: &SessionId) -> Result<(), SourceError>;
}

/// One dependent result set, valid once the session is `ready`
#[async_trait]
pub trait ResultSource: Send + Sync + 'static {
    /// Name used to label fetched results
    fn name(&self) -> &str;

    /// Fetch the result payload for `id`
    async fn fetch(&self, id: &SessionId) -> Result<Value, SourceError>;
}
