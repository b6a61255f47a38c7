//! Session status vocabulary
//!
//! Feature backends report progress with their own labels
//! (`analyzing`, `generating`, `completed`, `error`, ...). All of them map
//! onto four canonical states; the raw label survives on the record as a
//! cosmetic stage name.

use crate::error::StatusParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, work not started yet
    Draft,
    /// Work in progress on the server
    Running,
    /// Terminal success; result sets may be fetched
    Ready,
    /// Terminal failure; only an explicit retry resumes it
    Failed,
}

impl SessionStatus {
    /// Every status, in lifecycle order
    pub const ALL: [SessionStatus; 4] = [
        SessionStatus::Draft,
        SessionStatus::Running,
        SessionStatus::Ready,
        SessionStatus::Failed,
    ];

    /// True only for `Ready` and `Failed`
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ready | SessionStatus::Failed)
    }

    /// Canonical lowercase label
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Running => "running",
            SessionStatus::Ready => "ready",
            SessionStatus::Failed => "failed",
        }
    }

    /// Normalize a backend label onto the canonical set.
    ///
    /// Matching is case-insensitive and treats `-` and spaces like `_`.
    ///
    /// # Errors
    /// Returns [`StatusParseError`] for labels outside the known vocabulary.
    pub fn normalize(label: &str) -> Result<Self, StatusParseError> {
        let key = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let status = match key.as_str() {
            "draft" | "pending" | "new" | "created" => SessionStatus::Draft,
            "running" | "analyzing" | "generating" | "syncing" | "comparing" | "processing"
            | "in_progress" => SessionStatus::Running,
            "ready" | "completed" | "complete" | "done" => SessionStatus::Ready,
            "failed" | "error" => SessionStatus::Failed,
            _ => return Err(StatusParseError::Unknown(label.to_string())),
        };
        Ok(status)
    }
}

impl FromStr for SessionStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_labels_collapse_to_running() {
        for label in ["analyzing", "Generating", "SYNCING", "comparing", "in-progress"] {
            assert_eq!(SessionStatus::normalize(label).unwrap(), SessionStatus::Running);
        }
    }

    #[test]
    fn terminal_aliases() {
        assert_eq!("completed".parse::<SessionStatus>().unwrap(), SessionStatus::Ready);
        assert_eq!("error".parse::<SessionStatus>().unwrap(), SessionStatus::Failed);
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = SessionStatus::normalize("paused").unwrap_err();
        assert!(err.to_string().contains("paused"));
    }

    #[test]
    fn only_ready_and_failed_are_terminal() {
        assert!(!SessionStatus::Draft.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Ready.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }
}
