use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::mesh::MeshDetector;
use crate::graph::Endpoint;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// Performs one outbound POST to a model-serving endpoint
#[async_trait]
pub trait ServiceCaller: Send + Sync {
    async fn call(
        &self,
        endpoint: &Endpoint,
        body: Bytes,
        headers: &HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Bytes, CallError>;
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct HttpServiceClient {
    client: reqwest::Client,
    mesh: Option<Arc<MeshDetector>>,
}

impl HttpServiceClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            mesh: None,
        }
    }

    /// Downgrade https routes to http when running behind a service-mesh sidecar
    pub fn with_mesh_detector(mut self, mesh: Arc<MeshDetector>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    async fn target_url(&self, endpoint: &Endpoint) -> reqwest::Url {
        let mut url = endpoint.url().clone();
        if url.scheme() != "https" {
            return url;
        }
        if let Some(mesh) = &self.mesh {
            if mesh.in_mesh().await && url.set_scheme("http").is_ok() {
                info!(
                    "Using plain-text scheme to let the mesh manage TLS for {}",
                    url
                );
            }
        }
        url
    }
}

impl Default for HttpServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceCaller for HttpServiceClient {
    async fn call(
        &self,
        endpoint: &Endpoint,
        body: Bytes,
        headers: &HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Bytes, CallError> {
        let url = self.target_url(endpoint).await;
        debug!("Calling service {}", url);

        let mut req = self.client.post(url).headers(headers.clone()).body(body);
        if !headers.contains_key(CONTENT_TYPE) {
            req = req.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CallError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        response.bytes().await.map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Timeout
    } else {
        CallError::Http(e.to_string())
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_display() {
        let err = CallError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "service returned 500: boom");
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = mock::MockServiceCaller::new().reply("a", r#"{"ok":true}"#);
        let endpoint = Endpoint::parse("http://a/predict").unwrap();

        let out = mock
            .call(&endpoint, Bytes::from_static(b"{}"), &HeaderMap::new(), None)
            .await
            .unwrap();

        assert_eq!(out, Bytes::from_static(br#"{"ok":true}"#));
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.calls()[0].0, "a");
    }

    #[tokio::test]
    async fn test_http_client_connection_refused_is_error() {
        // Port 9 (discard) is not expected to accept HTTP on loopback
        let client = HttpServiceClient::new();
        let endpoint = Endpoint::parse("http://127.0.0.1:9/predict").unwrap();
        let result = client
            .call(
                &endpoint,
                Bytes::from_static(b"{}"),
                &HeaderMap::new(),
                Some(Duration::from_secs(2)),
            )
            .await;
        assert!(matches!(
            result,
            Err(CallError::Http(_)) | Err(CallError::Timeout)
        ));
    }
}
