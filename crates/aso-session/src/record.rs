//! Session record: the unit of trackable work
//!
//! The orchestrator depends structurally on `status`, the progress
//! counters and `error_message`. Everything else a backend sends is kept
//! as opaque `payload` and passed through unchanged.

use crate::error::{StatusParseError, TransitionError};
use crate::state_machine::{validate_transition, TransitionCause};
use crate::status::SessionStatus;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque session identifier assigned by the trigger source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a backend identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// Backends disagree on whether ids are strings or integers.
impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Number(n) => Self(n.to_string()),
        })
    }
}

/// Progress counters clamped for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Completed steps, never above `total`
    pub step: u32,
    /// Total steps (0 when unknown)
    pub total: u32,
}

impl Progress {
    /// Fraction in `[0.0, 1.0]`; 0 when the total is unknown
    #[inline]
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.step) / f64::from(self.total)
        }
    }

    /// Whole percentage in `[0, 100]`
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = u64::from(self.step) * 100 / u64::from(self.total);
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.step, self.total)
    }
}

/// A session as last reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireRecord", into = "WireRecord")]
pub struct SessionRecord {
    /// Identifier, immutable once assigned
    pub id: SessionId,
    /// Canonical status
    pub status: SessionStatus,
    /// Backend label the status was normalized from (`generating`, ...)
    pub stage_label: String,
    /// Completed steps as reported (may exceed `progress_total`)
    pub progress_step: u32,
    /// Total steps as reported
    pub progress_total: u32,
    /// Human-readable progress line, replaced on every update
    pub progress_message: Option<String>,
    /// Failure reason; only present while `status` is `Failed`
    pub error_message: Option<String>,
    /// Informational only
    pub created_at: Option<DateTime<Utc>>,
    /// Informational only
    pub updated_at: Option<DateTime<Utc>>,
    /// Feature-specific fields, passed through untouched
    pub payload: Map<String, Value>,
}

impl SessionRecord {
    /// Create a record with empty progress
    #[must_use]
    pub fn new(id: impl Into<SessionId>, status: SessionStatus) -> Self {
        Self {
            id: id.into(),
            status,
            stage_label: status.as_str().to_string(),
            progress_step: 0,
            progress_total: 0,
            progress_message: None,
            error_message: None,
            created_at: None,
            updated_at: None,
            payload: Map::new(),
        }
    }

    /// With progress counters
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, step: u32, total: u32) -> Self {
        self.progress_step = step;
        self.progress_total = total;
        self
    }

    /// With progress message
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.progress_message = Some(message.into());
        self
    }

    /// With error message
    #[inline]
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// With a cosmetic stage label
    #[inline]
    #[must_use]
    pub fn with_stage_label(mut self, label: impl Into<String>) -> Self {
        self.stage_label = label.into();
        self
    }

    /// With an opaque payload field
    #[inline]
    #[must_use]
    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Check for a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress with `step` clamped to `total`
    #[inline]
    #[must_use]
    pub fn progress(&self) -> Progress {
        Progress {
            step: self.progress_step.min(self.progress_total),
            total: self.progress_total,
        }
    }

    /// Apply a newer record through the state machine.
    ///
    /// On success the stored record is replaced wholesale by `incoming`,
    /// except that `error_message` is dropped unless the new status is
    /// `Failed` and missing timestamps keep their previous values.
    ///
    /// # Errors
    /// - [`TransitionError::IdentityMismatch`] if `incoming` is another session
    /// - [`TransitionError::Illegal`] if the state machine refuses the move;
    ///   `self` is left unchanged
    pub fn apply(
        &mut self,
        mut incoming: SessionRecord,
        cause: TransitionCause,
    ) -> Result<Transition, TransitionError> {
        if incoming.id != self.id {
            return Err(TransitionError::IdentityMismatch {
                expected: self.id.to_string(),
                found: incoming.id.to_string(),
            });
        }
        validate_transition(self.status, incoming.status, cause)?;

        let transition = Transition {
            from: self.status,
            to: incoming.status,
            cause,
        };
        if incoming.status != SessionStatus::Failed {
            incoming.error_message = None;
        }
        if incoming.created_at.is_none() {
            incoming.created_at = self.created_at;
        }
        if incoming.updated_at.is_none() {
            incoming.updated_at = self.updated_at;
        }
        *self = incoming;
        Ok(transition)
    }
}

/// An applied status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status before
    pub from: SessionStatus,
    /// Status after
    pub to: SessionStatus,
    /// What produced it
    pub cause: TransitionCause,
}

impl Transition {
    /// Status actually changed
    #[inline]
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// This transition moved the session into `status`
    #[inline]
    #[must_use]
    pub fn entered(&self, status: SessionStatus) -> bool {
        self.changed() && self.to == status
    }

    /// This transition moved the session into a terminal status
    #[inline]
    #[must_use]
    pub fn entered_terminal(&self) -> bool {
        self.changed() && self.to.is_terminal()
    }
}

#[derive(Serialize, Deserialize)]
struct WireRecord {
    id: SessionId,
    status: String,
    #[serde(default, alias = "progressStep", skip_serializing_if = "Option::is_none")]
    progress_step: Option<u32>,
    #[serde(default, alias = "progressTotal", skip_serializing_if = "Option::is_none")]
    progress_total: Option<u32>,
    #[serde(default, alias = "progressMessage", skip_serializing_if = "Option::is_none")]
    progress_message: Option<String>,
    #[serde(default, alias = "errorMessage", skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(
        default,
        alias = "createdAt",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        alias = "updatedAt",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl TryFrom<WireRecord> for SessionRecord {
    type Error = StatusParseError;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        let status = SessionStatus::normalize(&wire.status)?;
        Ok(Self {
            id: wire.id,
            status,
            stage_label: wire.status,
            progress_step: wire.progress_step.unwrap_or(0),
            progress_total: wire.progress_total.unwrap_or(0),
            progress_message: wire.progress_message,
            error_message: wire.error_message,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            payload: wire.payload,
        })
    }
}

impl From<SessionRecord> for WireRecord {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            status: record.stage_label,
            progress_step: Some(record.progress_step),
            progress_total: Some(record.progress_total),
            progress_message: record.progress_message,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at,
            payload: record.payload,
        }
    }
}

// Timestamps are informational, so an unparseable one becomes `None`
// instead of failing the whole record.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    Ok(["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&raw, fmt).ok())
        .map(|naive| naive.and_utc()))
}
