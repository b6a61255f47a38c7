//! Session lifecycle state machine
//!
//! ```text
//! draft ──> running ──> ready
//!   │          │    └─> failed
//!   └──────────┴──────> ready | failed
//! ready | failed ──(trigger only)──> running | ready | failed
//! ```
//!
//! Every status may move to itself (idempotent re-poll). Terminal states
//! never move because of an observation; only an explicit trigger
//! (retry or re-analysis) reopens them.

use crate::error::TransitionError;
use crate::status::SessionStatus;
use serde::{Deserialize, Serialize};

/// What produced a new status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionCause {
    /// Status query response (poll tick or manual refresh)
    Observed,
    /// Response to an explicit trigger call (retry, analyze)
    Trigger,
}

/// Check whether `from -> to` is legal for `cause`.
#[must_use]
pub fn can_transition(from: SessionStatus, to: SessionStatus, cause: TransitionCause) -> bool {
    use SessionStatus::{Draft, Failed, Ready, Running};

    if from == to {
        return true;
    }
    match (from, to, cause) {
        (_, Draft, _) => false,
        (Draft | Running, Running | Ready | Failed, _) => true,
        (Ready | Failed, _, TransitionCause::Trigger) => true,
        (Ready | Failed, _, TransitionCause::Observed) => false,
    }
}

/// Statuses reachable from `from` for `cause`, excluding the self-loop.
#[must_use]
pub fn allowed_transitions(from: SessionStatus, cause: TransitionCause) -> Vec<SessionStatus> {
    SessionStatus::ALL
        .into_iter()
        .filter(|&to| to != from && can_transition(from, to, cause))
        .collect()
}

/// Validate a transition, returning the refusal as an error value.
///
/// # Errors
/// [`TransitionError::Illegal`] when [`can_transition`] is false.
pub fn validate_transition(
    from: SessionStatus,
    to: SessionStatus,
    cause: TransitionCause,
) -> Result<(), TransitionError> {
    if can_transition(from, to, cause) {
        Ok(())
    } else {
        Err(TransitionError::Illegal { from, to, cause })
    }
}
