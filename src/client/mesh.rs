use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Admin port of an Envoy sidecar
pub const DEFAULT_PROBE_URL: &str = "http://localhost:15000";

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Detects whether the router runs next to a service-mesh sidecar.
///
/// The sidecar may not be ready at start-up, so the probe runs lazily on first use and the
/// answer is kept for the lifetime of the process.
pub struct MeshDetector {
    client: reqwest::Client,
    probe_url: String,
    in_mesh: OnceCell<bool>,
}

impl MeshDetector {
    pub fn new(probe_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            probe_url: probe_url.into(),
            in_mesh: OnceCell::new(),
        }
    }

    pub async fn in_mesh(&self) -> bool {
        *self.in_mesh.get_or_init(|| self.probe()).await
    }

    async fn probe(&self) -> bool {
        let result = self
            .client
            .get(&self.probe_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        let in_mesh = match result {
            Ok(response) => response.status().is_success(),
            // Connection refused: no sidecar listening
            Err(e) if e.is_connect() => false,
            Err(e) => {
                warn!("Service mesh probe against {} failed: {}", self.probe_url, e);
                false
            }
        };
        info!("Service mesh detected: {}", in_mesh);
        in_mesh
    }
}

impl Default for MeshDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_URL)
    }
}
