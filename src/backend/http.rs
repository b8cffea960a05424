//! HTTP client for a remote stack service
//!
//! Endpoints:
//! - `POST   /v1/stacks`               create a stack
//! - `GET    /v1/stacks/{name}`        describe (404 = not found)
//! - `DELETE /v1/stacks/{name}`        delete
//! - `POST   /v1/templates/validate`   dry-run a template
//! - `PUT    /v1/objects/{bucket}/{key}` stage an object

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{
    BackendError, CreateStackRequest, ObjectStore, StackBackend, StackState, TemplateReport,
    TemplateSource,
};

/// Connection settings for the stack service
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL, e.g. "https://stacks.example.com"
    pub endpoint: String,
    /// Optional bearer token
    pub api_token: Option<String>,
    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,
}

impl HttpBackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_token: None,
            request_timeout_secs: 30,
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct CreateStackResponse {
    #[serde(rename = "stackId")]
    stack_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Shared request plumbing for the stack and object clients
#[derive(Debug, Clone)]
struct ApiClient {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl ApiClient {
    fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.endpoint, path);
        let mut req = self.client.request(method, &url);
        if let Some(ref token) = self.config.api_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

// ============================================================================
// SBIO: Pure response classification (no I/O)
// ============================================================================

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        BackendError::Unavailable(e.to_string())
    } else {
        BackendError::InvalidResponse(e.to_string())
    }
}

/// Map a non-success HTTP status onto the backend error taxonomy
pub fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });
    if status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::Throttled(message)
    } else if status.is_server_error() {
        BackendError::Unavailable(format!("{}: {}", status.as_u16(), message))
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Pull `{"error": "..."}` out of an error body, falling back to the raw text
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value["error"]
            .as_str()
            .or_else(|| value["message"].as_str())
            .map(String::from)
            .or_else(|| Some(trimmed.to_string())),
        Err(_) => Some(trimmed.to_string()),
    }
}

// ============================================================================
// Stack service client
// ============================================================================

/// [`StackBackend`] backed by the HTTP stack service
#[derive(Debug, Clone)]
pub struct HttpStackBackend {
    api: ApiClient,
}

impl HttpStackBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            api: ApiClient::new(config)?,
        })
    }
}

#[async_trait]
impl StackBackend for HttpStackBackend {
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String, BackendError> {
        debug!(stack = %request.name, "POST /v1/stacks");
        let resp = self
            .api
            .send(
                self.api
                    .build_request(Method::POST, "/v1/stacks")
                    .json(request),
            )
            .await?;
        let body: CreateStackResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(body.stack_id)
    }

    async fn describe_stack(&self, name: &str) -> Result<StackState, BackendError> {
        let path = format!("/v1/stacks/{}", name);
        debug!(stack = %name, "GET {}", path);
        match self
            .api
            .send(self.api.build_request(Method::GET, &path))
            .await
        {
            Ok(resp) => resp
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse(e.to_string())),
            Err(BackendError::Rejected { status: 404, .. }) => Ok(StackState::not_found(name)),
            Err(e) => Err(e),
        }
    }

    async fn delete_stack(&self, name: &str) -> Result<(), BackendError> {
        let path = format!("/v1/stacks/{}", name);
        debug!(stack = %name, "DELETE {}", path);
        self.api
            .send(self.api.build_request(Method::DELETE, &path))
            .await?;
        Ok(())
    }

    async fn validate_template(
        &self,
        template: &TemplateSource,
    ) -> Result<TemplateReport, BackendError> {
        debug!("POST /v1/templates/validate");
        let resp = self
            .api
            .send(
                self.api
                    .build_request(Method::POST, "/v1/templates/validate")
                    .json(&serde_json::json!({ "template": template })),
            )
            .await;

        match resp {
            Ok(resp) => resp
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse(e.to_string())),
            // The service answers 400 with a readable report for broken templates
            Err(BackendError::Rejected {
                status: 400,
                message,
            }) => Ok(TemplateReport {
                valid: false,
                report: message,
            }),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Object storage client
// ============================================================================

/// [`ObjectStore`] backed by the same HTTP service
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    api: ApiClient,
}

impl HttpObjectStore {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            api: ApiClient::new(config)?,
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<String, BackendError> {
        let path = format!("/v1/objects/{}/{}", bucket, key);
        debug!(bytes = body.len(), "PUT {}", path);
        let resp = self
            .api
            .send(
                self.api
                    .build_request(Method::PUT, &path)
                    .header("Content-Type", "application/octet-stream")
                    .body(body),
            )
            .await?;
        let uploaded: UploadResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(uploaded.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Retryable;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = HttpBackendConfig::new("https://stacks.example.com/").with_api_token("t");
        assert_eq!(config.endpoint, "https://stacks.example.com");
        assert_eq!(config.api_token.as_deref(), Some("t"));
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_throttling_is_transient() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, r#"{"error": "Rate exceeded"}"#);
        assert_eq!(err, BackendError::Throttled("Rate exceeded".to_string()));
        assert!(err.is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_client_errors_are_rejections() {
        let err = status_error(StatusCode::CONFLICT, r#"{"message": "stack exists"}"#);
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 409,
                message: "stack exists".to_string()
            }
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_plain_text_error_body() {
        let err = status_error(StatusCode::BAD_REQUEST, "Template format error\n");
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 400,
                message: "Template format error".to_string()
            }
        );
    }

    #[test]
    fn test_clients_build() {
        let config = HttpBackendConfig::new("http://127.0.0.1:1");
        assert!(HttpStackBackend::new(config.clone()).is_ok());
        assert!(HttpObjectStore::new(config).is_ok());
    }
}
