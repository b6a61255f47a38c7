//! Shared request plumbing

use crate::config::{HttpBackendConfig, ID_PLACEHOLDER};
use crate::error::{transport, HttpConfigError};
use aso_core::SourceError;
use aso_session::SessionId;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Client bound to one backend base URL
#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    http: Client,
    base: Url,
    envelope: Option<String>,
}

impl ApiClient {
    pub(crate) fn new(config: &HttpBackendConfig) -> Result<Self, HttpConfigError> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base: config.base()?,
            envelope: config.envelope.clone(),
        })
    }

    /// Resolve `template` against the base URL.
    ///
    /// Each template segment becomes one path segment, so an identifier
    /// containing `/` or `?` is percent-encoded rather than changing the
    /// route.
    pub(crate) fn url(&self, template: &str, id: Option<&SessionId>) -> Result<Url, SourceError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| SourceError::Protocol("base url cannot carry a path".to_string()))?;
            segments.pop_if_empty();
            for segment in template.split('/').filter(|s| !s.is_empty()) {
                match id {
                    Some(id) if segment.contains(ID_PLACEHOLDER) => {
                        segments.push(&segment.replace(ID_PLACEHOLDER, id.as_str()));
                    }
                    _ => {
                        segments.push(segment);
                    }
                }
            }
        }
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// Send and map non-success statuses
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, SourceError> {
        let response = request.send().await.map_err(|e| transport(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SourceError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    /// Decode the body, unwrapping the configured envelope first
    pub(crate) async fn decode<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, SourceError> {
        let body = response.bytes().await.map_err(|e| transport(&e))?;
        let protocol = |e: serde_json::Error| SourceError::Protocol(e.to_string());
        match &self.envelope {
            None => serde_json::from_slice(&body).map_err(protocol),
            Some(field) => {
                let mut value: Value = serde_json::from_slice(&body).map_err(protocol)?;
                let inner = value
                    .get_mut(field.as_str())
                    .map(Value::take)
                    .ok_or_else(|| {
                        SourceError::Protocol(format!("response has no `{field}` field"))
                    })?;
                serde_json::from_value(inner).map_err(protocol)
            }
        }
    }

    /// Decode the body without unwrapping
    pub(crate) async fn decode_raw(response: Response) -> Result<Value, SourceError> {
        let body = response.bytes().await.map_err(|e| transport(&e))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| SourceError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&HttpBackendConfig::new(base)).unwrap()
    }

    #[test]
    fn renders_templates_under_base_path() {
        let client = client("https://api.example/v2/");
        let id = SessionId::new("s-42");

        let url = client.url("/sessions/{id}/retry", Some(&id)).unwrap();
        assert_eq!(url.as_str(), "https://api.example/v2/sessions/s-42/retry");

        let url = client.url("/sessions", None).unwrap();
        assert_eq!(url.as_str(), "https://api.example/v2/sessions");
    }

    #[test]
    fn encodes_identifier_as_one_segment() {
        let client = client("http://localhost:9000");
        let id = SessionId::new("team/a?x=1");

        let url = client.url("/sessions/{id}", Some(&id)).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/sessions/team%2Fa%3Fx=1");
    }

    #[test]
    fn placeholder_inside_segment() {
        let client = client("http://localhost:9000");
        let url = client
            .url("/jobs/job-{id}.json", Some(&SessionId::new("7")))
            .unwrap();
        assert_eq!(url.path(), "/jobs/job-7.json");
    }
}
