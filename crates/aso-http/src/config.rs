//! Backend configuration
//!
//! Every feature module exposes the same session lifecycle under its own
//! paths. [`EndpointTemplates`] maps each operation to a path template in
//! which `{id}` stands for the session identifier.

use crate::error::HttpConfigError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Placeholder replaced by the session identifier
pub const ID_PLACEHOLDER: &str = "{id}";

/// Path templates for one feature module's session endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointTemplates {
    /// `POST` creating a session
    pub create: String,
    /// `GET` returning the current record
    pub status: String,
    /// `POST` starting or re-running analysis
    pub analyze: String,
    /// `POST` restarting a failed session
    pub retry: String,
    /// `DELETE` removing the session
    pub delete: String,
    /// Named `GET` result endpoints, fetched once the session is ready
    pub results: BTreeMap<String, String>,
}

impl Default for EndpointTemplates {
    fn default() -> Self {
        Self::conventional("/sessions")
    }
}

impl EndpointTemplates {
    /// The conventional layout under `prefix`:
    ///
    /// | operation | template |
    /// |---|---|
    /// | create | `{prefix}` |
    /// | status, delete | `{prefix}/{id}` |
    /// | analyze | `{prefix}/{id}/analyze` |
    /// | retry | `{prefix}/{id}/retry` |
    #[must_use]
    pub fn conventional(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let item = format!("{prefix}/{ID_PLACEHOLDER}");
        Self {
            create: prefix.to_string(),
            status: item.clone(),
            analyze: format!("{item}/analyze"),
            retry: format!("{item}/retry"),
            delete: item,
            results: BTreeMap::new(),
        }
    }

    /// With a named result endpoint
    #[must_use]
    pub fn with_result(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.results.insert(name.into(), template.into());
        self
    }

    /// Check every per-session template names the session
    ///
    /// # Errors
    /// [`HttpConfigError::MissingPlaceholder`] naming the first bad endpoint
    pub fn validate(&self) -> Result<(), HttpConfigError> {
        let per_session = [
            ("status", &self.status),
            ("analyze", &self.analyze),
            ("retry", &self.retry),
            ("delete", &self.delete),
        ];
        let results = self.results.iter().map(|(name, t)| (name.as_str(), t));
        for (endpoint, template) in per_session.into_iter().chain(results) {
            if !template.contains(ID_PLACEHOLDER) {
                return Err(HttpConfigError::MissingPlaceholder {
                    endpoint: endpoint.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// HTTP backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    /// Scheme, host and optional path prefix shared by every endpoint
    pub base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Field wrapping the session record in responses, if any
    pub envelope: Option<String>,
    /// Endpoint templates
    pub endpoints: EndpointTemplates,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
            envelope: None,
            endpoints: EndpointTemplates::default(),
        }
    }
}

impl HttpBackendConfig {
    /// Configuration for a backend at `base_url` with conventional endpoints
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// With endpoint templates
    #[inline]
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: EndpointTemplates) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// With response envelope field
    #[inline]
    #[must_use]
    pub fn with_envelope(mut self, field: impl Into<String>) -> Self {
        self.envelope = Some(field.into());
        self
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse and check the base URL
    ///
    /// # Errors
    /// [`HttpConfigError::InvalidUrl`] unless it is an absolute `http(s)` URL
    pub fn base(&self) -> Result<Url, HttpConfigError> {
        let invalid = |reason: String| HttpConfigError::InvalidUrl {
            url: self.base_url.clone(),
            reason,
        };
        let url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        if url.cannot_be_a_base() {
            return Err(invalid("cannot be a base".to_string()));
        }
        Ok(url)
    }

    /// Check the whole configuration
    ///
    /// # Errors
    /// The first [`HttpConfigError`] found
    pub fn validate(&self) -> Result<(), HttpConfigError> {
        self.base()?;
        if self.request_timeout_secs == 0 {
            return Err(HttpConfigError::ZeroTimeout);
        }
        self.endpoints.validate()
    }
}
