//! Result fan-out
//!
//! The orchestrator only announces that a session became ready. Which
//! result sets to load is the feature module's business: it binds its
//! [`ResultSource`]s to a [`ResultBinder`], which fetches all of them once
//! per [`SessionEvent::BecameReady`].

use crate::error::SourceError;
use crate::events::SessionEvent;
use crate::source::ResultSource;
use aso_session::SessionId;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Outcome of fetching one result source
#[derive(Debug, Clone)]
pub struct FetchedResult {
    /// Source name
    pub name: String,
    /// Payload or failure
    pub outcome: Result<Value, SourceError>,
}

/// All results fetched for one ready session
#[derive(Debug, Clone)]
pub struct ResultBatch {
    /// Session the results belong to
    pub session_id: SessionId,
    /// One entry per bound source, in binding order
    pub results: Vec<FetchedResult>,
}

impl ResultBatch {
    /// Look up one result by source name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Result<Value, SourceError>> {
        self.results
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }

    /// Every source succeeded
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_ok())
    }
}

/// Binds result sources to "became ready" notifications
#[derive(Default)]
pub struct ResultBinder {
    sources: Vec<Arc<dyn ResultSource>>,
}

impl std::fmt::Debug for ResultBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| s.name()))
            .finish()
    }
}

impl ResultBinder {
    /// Create binder with no sources
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a result source
    #[must_use]
    pub fn bind(mut self, source: Arc<dyn ResultSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Number of bound sources
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// No sources bound
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetch every bound source concurrently for `id`
    pub async fn fetch_all(&self, id: &SessionId) -> ResultBatch {
        let fetches = self.sources.iter().map(|source| async move {
            FetchedResult {
                name: source.name().to_string(),
                outcome: source.fetch(id).await,
            }
        });
        let results = join_all(fetches).await;
        for failed in results.iter().filter(|r| r.outcome.is_err()) {
            tracing::warn!(session_id = %id, source = %failed.name, "result fetch failed");
        }
        ResultBatch {
            session_id: id.clone(),
            results,
        }
    }

    /// Listen for `BecameReady` events and deliver one batch per event.
    ///
    /// The task ends when the event stream closes or the batch receiver
    /// is dropped. Lagged events are skipped with a warning.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> (mpsc::Receiver<ResultBatch>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            loop {
                let record = match events.recv().await {
                    Ok(SessionEvent::BecameReady(record)) => record,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "result binder lagged behind session events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let batch = self.fetch_all(&record.id).await;
                if tx.send(batch).await.is_err() {
                    break;
                }
            }
        });
        (rx, handle)
    }
}
