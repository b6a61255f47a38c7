//! Error types for ASO HTTP

use aso_core::SourceError;

/// Backend configuration rejected
#[derive(Debug, thiserror::Error)]
pub enum HttpConfigError {
    /// Base URL unusable
    #[error("invalid base url {url}: {reason}")]
    InvalidUrl {
        /// Offending value
        url: String,
        /// Why
        reason: String,
    },

    /// Per-session endpoint template lacks `{id}`
    #[error("endpoint {endpoint} has no {{id}} placeholder")]
    MissingPlaceholder {
        /// Endpoint name
        endpoint: String,
    },

    /// Request timeout of zero
    #[error("request timeout must be positive")]
    ZeroTimeout,

    /// HTTP client could not be built
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Map a transport-level failure
pub(crate) fn transport(err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else if err.is_decode() {
        SourceError::Protocol(err.to_string())
    } else {
        SourceError::Unreachable(err.to_string())
    }
}
