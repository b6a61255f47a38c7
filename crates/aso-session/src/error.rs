//! Error types for session records and transitions

use crate::state_machine::TransitionCause;
use crate::status::SessionStatus;

/// Status label outside the known vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusParseError {
    /// Label could not be normalized
    #[error("unknown session status label: {0:?}")]
    Unknown(String),
}

/// A transition the state machine refuses to apply
///
/// These are data-integrity errors: the caller logs and ignores them, and
/// the last accepted record stays in place.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Transition not in the lifecycle graph for this cause
    #[error("illegal transition {from} -> {to} ({cause:?})")]
    Illegal {
        /// Current status
        from: SessionStatus,
        /// Observed status
        to: SessionStatus,
        /// What produced the observation
        cause: TransitionCause,
    },

    /// Response belongs to another session
    #[error("response for session {found} applied to session {expected}")]
    IdentityMismatch {
        /// Identifier of the stored record
        expected: String,
        /// Identifier carried by the response
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_display() {
        let err = TransitionError::Illegal {
            from: SessionStatus::Ready,
            to: SessionStatus::Running,
            cause: TransitionCause::Observed,
        };
        assert_eq!(err.to_string(), "illegal transition ready -> running (Observed)");
    }
}
