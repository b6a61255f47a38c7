//! REST session backend

use crate::client::ApiClient;
use crate::config::{EndpointTemplates, HttpBackendConfig};
use crate::error::HttpConfigError;
use crate::results::HttpResultSource;
use aso_core::{ResultSource, SessionBackend, SourceError, StatusSource};
use aso_session::{SessionId, SessionRecord};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

/// Session backend speaking JSON over HTTP
///
/// Status maps onto `GET`, triggers onto `POST`, delete onto `DELETE`.
/// Failures map onto [`SourceError`]:
/// - connection failures → `Unreachable`
/// - request timeout → `Timeout`
/// - 404 → `NotFound`
/// - any other non-2xx → `Rejected` with the response body as message
/// - undecodable body or unknown status label → `Protocol`
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: ApiClient,
    endpoints: EndpointTemplates,
}

impl HttpSessionBackend {
    /// Build a backend from configuration
    ///
    /// # Errors
    /// [`HttpConfigError`] if the configuration is invalid or the client
    /// cannot be built
    pub fn new(config: &HttpBackendConfig) -> Result<Self, HttpConfigError> {
        Ok(Self {
            client: ApiClient::new(config)?,
            endpoints: config.endpoints.clone(),
        })
    }

    /// Endpoint templates in use
    #[inline]
    #[must_use]
    pub fn endpoints(&self) -> &EndpointTemplates {
        &self.endpoints
    }

    /// One result source per configured result endpoint, sharing this
    /// backend's connection pool
    #[must_use]
    pub fn result_sources(&self) -> Vec<Arc<dyn ResultSource>> {
        self.endpoints
            .results
            .iter()
            .map(|(name, template)| {
                Arc::new(HttpResultSource::from_client(
                    self.client.clone(),
                    name.clone(),
                    template.clone(),
                )) as Arc<dyn ResultSource>
            })
            .collect()
    }

    async fn trigger(
        &self,
        operation: &str,
        template: &str,
        id: &SessionId,
    ) -> Result<SessionRecord, SourceError> {
        let url = self.client.url(template, Some(id))?;
        tracing::debug!(session_id = %id, operation, %url, "sending trigger");
        let response = self.client.send(self.client.request(Method::POST, url)).await?;
        self.record(id, response).await
    }

    async fn record(
        &self,
        id: &SessionId,
        response: reqwest::Response,
    ) -> Result<SessionRecord, SourceError> {
        let record: SessionRecord = self.client.decode(response).await?;
        if &record.id != id {
            return Err(SourceError::Protocol(format!(
                "asked for session {id}, backend answered for {}",
                record.id
            )));
        }
        Ok(record)
    }
}

#[async_trait]
impl StatusSource for HttpSessionBackend {
    async fn status(&self, id: &SessionId) -> Result<SessionRecord, SourceError> {
        let url = self.client.url(&self.endpoints.status, Some(id))?;
        let response = self.client.send(self.client.request(Method::GET, url)).await?;
        self.record(id, response).await
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn create(&self, params: &Value) -> Result<SessionRecord, SourceError> {
        let url = self.client.url(&self.endpoints.create, None)?;
        tracing::debug!(%url, "creating session");
        let request = self.client.request(Method::POST, url).json(params);
        let response = self.client.send(request).await?;
        self.client.decode(response).await
    }

    async fn analyze(&self, id: &SessionId) -> Result<SessionRecord, SourceError> {
        self.trigger("analyze", &self.endpoints.analyze, id).await
    }

    async fn retry(&self, id: &SessionId) -> Result<SessionRecord, SourceError> {
        self.trigger("retry", &self.endpoints.retry, id).await
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SourceError> {
        let url = self.client.url(&self.endpoints.delete, Some(id))?;
        self.client.send(self.client.request(Method::DELETE, url)).await?;
        Ok(())
    }
}
