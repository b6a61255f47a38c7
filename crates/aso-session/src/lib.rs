//! ASO Session - session records and their lifecycle
//!
//! Pure data and rules, no I/O:
//! - [`SessionRecord`]: what a backend reports about one unit of work
//! - [`SessionStatus`]: the canonical `draft → running → {ready, failed}` vocabulary
//! - [`state_machine`]: which status changes may be applied, and why
//!
//! # Example
//!
//! ```rust
//! use aso_session::{SessionRecord, SessionStatus, TransitionCause};
//!
//! let mut record = SessionRecord::new("s-1", SessionStatus::Running).with_progress(0, 5);
//! let update = SessionRecord::new("s-1", SessionStatus::Ready).with_progress(5, 5);
//!
//! let transition = record.apply(update, TransitionCause::Observed).unwrap();
//! assert!(transition.entered(SessionStatus::Ready));
//! ```

pub mod error;
pub mod record;
pub mod state_machine;
pub mod status;

pub use error::{StatusParseError, TransitionError};
pub use record::{Progress, SessionId, SessionRecord, Transition};
pub use state_machine::{allowed_transitions, can_transition, validate_transition, TransitionCause};
pub use status::SessionStatus;
