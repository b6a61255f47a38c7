//! Error types for ASO Core
//!
//! Covers the error taxonomy of the orchestrator:
//! - Collaborator failures (network, rejection, undecodable responses)
//! - Creation/trigger failures surfaced to the caller
//! - Contract violations (retry on a non-failed session, unknown session)
//! - Configuration errors

use aso_session::{SessionId, SessionStatus};

/// Failure reported by a status, trigger or result source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Backend could not be reached
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Backend refused the request (bad input, missing precondition)
    #[error("rejected by backend ({status}): {message}")]
    Rejected {
        /// Backend status code
        status: u16,
        /// Backend explanation
        message: String,
    },

    /// Session does not exist on the backend
    #[error("session not found on backend")]
    NotFound,

    /// Response could not be decoded
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Network-level failure that may succeed on the next attempt
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::NotFound | Self::Protocol(_) => false,
        }
    }
}

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Trigger source unreachable or rejected the creation input
    #[error("session creation failed: {0}")]
    Creation(#[source] SourceError),

    /// Retry or analysis trigger failed
    #[error("trigger failed for session {id}: {source}")]
    Trigger {
        /// Session the trigger was for
        id: SessionId,
        /// Underlying failure
        #[source]
        source: SourceError,
    },

    /// Manual status query failed
    #[error("status query failed for session {id}: {source}")]
    Status {
        /// Session queried
        id: SessionId,
        /// Underlying failure
        #[source]
        source: SourceError,
    },

    /// Backend delete failed
    #[error("delete failed for session {id}: {source}")]
    Delete {
        /// Session to delete
        id: SessionId,
        /// Underlying failure
        #[source]
        source: SourceError,
    },

    /// Operation not valid for the session's current status
    #[error("cannot {operation} session {id} while {status}")]
    InvalidState {
        /// Session
        id: SessionId,
        /// Its current status
        status: SessionStatus,
        /// Operation attempted
        operation: &'static str,
    },

    /// Session is not tracked by this orchestrator
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

impl OrchestratorError {
    /// Programming error rather than a runtime condition
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::UnknownSession(_))
    }

    /// Caller may retry the same operation
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Creation(source)
            | Self::Trigger { source, .. }
            | Self::Status { source, .. }
            | Self::Delete { source, .. } => source.is_transient(),
            Self::InvalidState { .. } | Self::UnknownSession(_) => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are inconsistent
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_is_transient() {
        assert!(SourceError::Unreachable("refused".to_string()).is_transient());
        assert!(SourceError::Timeout.is_transient());
        assert!(SourceError::Rejected { status: 503, message: String::new() }.is_transient());
        assert!(!SourceError::Rejected { status: 422, message: String::new() }.is_transient());
        assert!(!SourceError::NotFound.is_transient());
    }

    #[test]
    fn invalid_state_display() {
        let err = OrchestratorError::InvalidState {
            id: SessionId::new("s1"),
            status: SessionStatus::Running,
            operation: "retry",
        };
        assert_eq!(err.to_string(), "cannot retry session s1 while running");
        assert!(err.is_contract_violation());
        assert!(!err.is_transient());
    }

    #[test]
    fn creation_error_classification() {
        let err = OrchestratorError::Creation(SourceError::Rejected {
            status: 412,
            message: "no integration connected".to_string(),
        });
        assert!(!err.is_contract_violation());
        assert!(err.to_string().contains("no integration connected"));
    }
}
