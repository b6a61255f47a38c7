//! REST result endpoints

use crate::client::ApiClient;
use crate::config::HttpBackendConfig;
use crate::error::HttpConfigError;
use aso_core::{ResultSource, SourceError};
use aso_session::SessionId;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

/// One named result endpoint, fetched as raw JSON
///
/// The envelope setting applies to session records only; result payloads
/// are returned whole.
#[derive(Debug, Clone)]
pub struct HttpResultSource {
    client: ApiClient,
    name: String,
    template: String,
}

impl HttpResultSource {
    /// Standalone result source for `template` on the configured backend
    ///
    /// # Errors
    /// [`HttpConfigError`] if the configuration is invalid
    pub fn new(
        config: &HttpBackendConfig,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Result<Self, HttpConfigError> {
        Ok(Self::from_client(
            ApiClient::new(config)?,
            name.into(),
            template.into(),
        ))
    }

    pub(crate) fn from_client(client: ApiClient, name: String, template: String) -> Self {
        Self {
            client,
            name,
            template,
        }
    }
}

#[async_trait]
impl ResultSource for HttpResultSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, id: &SessionId) -> Result<Value, SourceError> {
        let url = self.client.url(&self.template, Some(id))?;
        let response = self.client.send(self.client.request(Method::GET, url)).await?;
        ApiClient::decode_raw(response).await
    }
}
