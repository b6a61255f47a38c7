//! ASO HTTP - REST backend for the session orchestrator
//!
//! Implements [`aso_core::SessionBackend`] and [`aso_core::ResultSource`]
//! over `reqwest` for any feature module exposing the session lifecycle
//! as JSON endpoints:
//! - endpoint paths come from [`EndpointTemplates`] (`{id}` placeholders)
//! - response bodies decode into [`aso_session::SessionRecord`], status
//!   aliases and camelCase field names included
//! - HTTP failures map onto [`aso_core::SourceError`]
//!
//! # Example
//!
//! ```rust,ignore
//! use aso_core::{OrchestratorConfig, ResultBinder, SessionOrchestrator};
//! use aso_http::{EndpointTemplates, HttpBackendConfig, HttpSessionBackend};
//! use std::sync::Arc;
//!
//! let config = HttpBackendConfig::new("https://api.example").with_endpoints(
//!     EndpointTemplates::conventional("/backlog/sessions")
//!         .with_result("stories", "/backlog/sessions/{id}/stories"),
//! );
//! let backend = Arc::new(HttpSessionBackend::new(&config)?);
//! let binder = backend
//!     .result_sources()
//!     .into_iter()
//!     .fold(ResultBinder::new(), ResultBinder::bind);
//! let orchestrator = SessionOrchestrator::new(backend, OrchestratorConfig::new())?;
//! ```

#![warn(unreachable_pub)]

mod client;
pub mod backend;
pub mod config;
pub mod error;
pub mod results;

pub use backend::HttpSessionBackend;
pub use config::{EndpointTemplates, HttpBackendConfig, ID_PLACEHOLDER};
pub use error::HttpConfigError;
pub use results::HttpResultSource;
