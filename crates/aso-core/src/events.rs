//! Observable session state
//!
//! Observers either watch one session's [`SessionSnapshot`] or subscribe
//! to the orchestrator-wide [`SessionEvent`] stream.

use aso_session::{Progress, SessionId, SessionRecord, SessionStatus, TransitionError};
use std::time::Duration;

/// Current record plus derived flags
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Last accepted record
    pub record: SessionRecord,
    /// A poll loop is live for this session
    pub polling: bool,
    /// Stall threshold passed during the current run
    pub stalled: bool,
}

impl SessionSnapshot {
    /// Snapshot of a record that is not being polled
    #[inline]
    #[must_use]
    pub fn new(record: SessionRecord) -> Self {
        Self {
            record,
            polling: false,
            stalled: false,
        }
    }

    /// Session identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.record.id
    }

    /// Canonical status
    #[inline]
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.record.status
    }

    /// In `ready` or `failed`
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.record.is_terminal()
    }

    /// In `ready`; result sets may be fetched
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.record.status == SessionStatus::Ready
    }

    /// A retry would be accepted
    #[inline]
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.record.status == SessionStatus::Failed
    }

    /// Progress clamped for display
    #[inline]
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.record.progress()
    }
}

/// Non-terminal for longer than the configured threshold
///
/// A signal, not a failure: polling continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledSessionWarning {
    /// Stalled session
    pub id: SessionId,
    /// Time since the current run started
    pub elapsed: Duration,
    /// Status at the time of the warning
    pub status: SessionStatus,
}

/// Why a poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Terminal status reached
    Terminal,
    /// Cancelled by an observer
    Cancelled,
}

/// Orchestrator-wide notifications
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A record was accepted (any cause)
    Updated(SessionRecord),
    /// The session entered `ready`; fired once per run
    BecameReady(SessionRecord),
    /// The session entered `failed`
    Failed(SessionRecord),
    /// The session passed the stall threshold
    Stalled(StalledSessionWarning),
    /// A response was refused by the state machine and ignored
    IntegrityViolation {
        /// Session concerned
        id: SessionId,
        /// Refusal
        error: TransitionError,
    },
    /// A poll loop ended
    PollStopped {
        /// Session concerned
        id: SessionId,
        /// Why
        reason: StopReason,
    },
}

impl SessionEvent {
    /// Session the event is about
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Updated(record) | Self::BecameReady(record) | Self::Failed(record) => &record.id,
            Self::Stalled(warning) => &warning.id,
            Self::IntegrityViolation { id, .. } | Self::PollStopped { id, .. } => id,
        }
    }
}
