pub mod handlers;
pub mod state;

pub use handlers::{create_router, error_status, ErrorResponse, REQUEST_ID_HEADER};
pub use state::{AppState, RequestGuard, DEFAULT_MAX_BODY_BYTES};

use std::time::Duration;

use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Wrap the router with request tracing and the overall write timeout
pub fn apply_layers(router: Router, write_timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::new(write_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Resolve when the process is asked to stop.
///
/// Readiness starts failing immediately; the server keeps accepting traffic
/// for `drain` so load balancers can move away before connections close.
pub async fn shutdown_signal(state: AppState, drain: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    state.begin_shutdown();
    info!(
        "Shutdown requested, draining for {}s ({} requests in flight)",
        drain.as_secs(),
        state.active_request_count()
    );
    tokio::time::sleep(drain).await;
}
