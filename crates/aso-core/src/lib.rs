//! ASO Core - Analysis-Session Orchestrator
//!
//! Drives long-running server-side analysis jobs from the client side:
//! - Creates sessions through a feature backend's trigger side
//! - Polls status with at most one loop and one in-flight query per session
//! - Validates every update against the session state machine
//! - Notifies observers, including a single "became ready" per run
//! - Surfaces stalled sessions without stopping them
//!
//! # Example
//!
//! ```rust,ignore
//! use aso_core::{OrchestratorConfig, ResultBinder, SessionOrchestrator};
//!
//! # use std::sync::Arc;
//! # async fn example(
//! #     backend: Arc<impl aso_core::SessionBackend>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = SessionOrchestrator::new(backend, OrchestratorConfig::new())?;
//! let (mut batches, _task) = ResultBinder::new().spawn(orchestrator.subscribe());
//!
//! let record = orchestrator.create(&serde_json::json!({"project": "alpha"})).await?;
//! println!("tracking {}", record.id);
//!
//! if let Some(batch) = batches.recv().await {
//!     println!("{} result sets loaded", batch.results.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod results;
pub mod scheduler;
pub mod source;

pub use config::OrchestratorConfig;
pub use error::{ConfigError, OrchestratorError, SourceError};
pub use events::{SessionEvent, SessionSnapshot, StalledSessionWarning, StopReason};
pub use orchestrator::SessionOrchestrator;
pub use results::{FetchedResult, ResultBatch, ResultBinder};
pub use scheduler::{PollObserver, PollScheduler, PollTicket};
pub use source::{ResultSource, SessionBackend, StatusSource};

pub use aso_session::{
    Progress, SessionId, SessionRecord, SessionStatus, Transition, TransitionCause,
    TransitionError,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with ASO Core
    pub use crate::{
        OrchestratorConfig, OrchestratorError, ResultBinder, SessionBackend, SessionEvent,
        SessionId, SessionOrchestrator, SessionRecord, SessionSnapshot, SessionStatus,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
