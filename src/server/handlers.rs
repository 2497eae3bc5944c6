use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info_span, Instrument};
use uuid::Uuid;

use crate::client::CallError;
use crate::runtime::{EngineError, StepContext};
use crate::server::state::AppState;

/// Header carrying the request id, read from the caller and echoed back
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Structured body returned when a graph execution fails
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub cause: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl From<&EngineError> for ErrorResponse {
    fn from(e: &EngineError) -> Self {
        Self {
            error: e.summary().to_string(),
            cause: e.to_string(),
            node: e.node().map(String::from),
            endpoint: e.endpoint().map(String::from),
        }
    }
}

/// HTTP status reported for a failed execution
pub fn error_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::CallFailure {
            source: CallError::Timeout,
            ..
        }
        | EngineError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        EngineError::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
        EngineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::CallFailure { .. }
        | EngineError::AggregationFailure { .. }
        | EngineError::TaskFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe: fails once shutdown has begun so traffic drains away
pub async fn ready(State(state): State<AppState>) -> Response {
    if state.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
    } else {
        StatusCode::OK.into_response()
    }
}

#[derive(Serialize)]
struct GraphStatus {
    entry: String,
    nodes: usize,
    active_requests: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    oldest_request_ms: Option<u64>,
}

/// Graph status endpoint
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let graph = state.engine.graph();
    Json(GraphStatus {
        entry: graph.entry_node().name.clone(),
        nodes: graph.len(),
        active_requests: state.active_request_count(),
        oldest_request_ms: state.oldest_request_age().map(|d| d.as_millis() as u64),
    })
}

/// Execute the graph with the request body as input
pub async fn route_graph(State(state): State<AppState>, request: Request) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let span = info_span!("graph_request", %request_id);
    let response = execute_request(state, request, request_id)
        .instrument(span)
        .await;

    with_request_id(response, request_id)
}

async fn execute_request(state: AppState, request: Request, request_id: Uuid) -> Response {
    let inbound_headers = request.headers().clone();

    // Size is capped by the router's DefaultBodyLimit; over-limit bodies are rejected with 413
    let read = Bytes::from_request(request, &state);
    let input = match tokio::time::timeout(state.body_read_timeout, read).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(rejection)) => {
            return plain_error(
                rejection.status(),
                "failed to read request body",
                rejection.body_text(),
            )
        }
        Err(_) => {
            return plain_error(
                StatusCode::REQUEST_TIMEOUT,
                "failed to read request body",
                "timed out reading request body".to_string(),
            )
        }
    };

    // Dropping this handler (client gone, server timeout) cancels every spawned step
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let _tracked = state.track_request(request_id);

    let mut ctx = StepContext::new(request_id)
        .with_headers(state.headers.select(&inbound_headers))
        .with_cancellation(cancel);
    if let Some(budget) = state.request_budget {
        ctx = ctx.with_budget(budget);
    }

    match state.engine.run(input, ctx).await {
        Ok(output) => {
            let mut response = Response::new(Body::from(output.clone()));
            if serde_json::from_slice::<serde::de::IgnoredAny>(&output).is_ok() {
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            response
        }
        Err(e) => {
            error!("Failed to process request: {}", e);
            (error_status(&e), Json(ErrorResponse::from(&e))).into_response()
        }
    }
}

fn plain_error(status: StatusCode, error: &str, cause: String) -> Response {
    let body = ErrorResponse {
        error: error.to_string(),
        cause,
        node: None,
        endpoint: None,
    };
    (status, Json(body)).into_response()
}

fn with_request_id(mut response: Response, request_id: Uuid) -> Response {
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(ready))
        .route("/status", get(status))
        .route("/", post(route_graph))
        .fallback(route_graph)
        .layer(body_limit)
        .with_state(state)
}
