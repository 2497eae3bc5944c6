use thiserror::Error;

use crate::client::CallError;
use crate::runtime::aggregate::AggregationError;

/// Why a step, and with it the whole request, failed
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not call service url {endpoint} in node '{node}': {source}")]
    CallFailure {
        node: String,
        endpoint: String,
        #[source]
        source: CallError,
    },

    #[error("failed to aggregate responses in node '{node}': {source}")]
    AggregationFailure {
        node: String,
        #[source]
        source: AggregationError,
    },

    #[error("no route matched in node '{node}'")]
    NoRouteMatched { node: String },

    #[error("request deadline exceeded in node '{node}'")]
    DeadlineExceeded { node: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("step for node '{node}' failed: {message}")]
    TaskFailed { node: String, message: String },
}

impl EngineError {
    /// Short, stable description used as the `error` field of error responses
    pub fn summary(&self) -> &'static str {
        match self {
            EngineError::CallFailure { .. } => "could not call service url",
            EngineError::AggregationFailure { .. } => "could not aggregate responses",
            EngineError::NoRouteMatched { .. } => "no route matched",
            EngineError::DeadlineExceeded { .. } => "request deadline exceeded",
            EngineError::Cancelled => "request cancelled",
            EngineError::TaskFailed { .. } => "step execution failed",
        }
    }

    /// Node the failure originated in, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            EngineError::CallFailure { node, .. }
            | EngineError::AggregationFailure { node, .. }
            | EngineError::NoRouteMatched { node }
            | EngineError::DeadlineExceeded { node }
            | EngineError::TaskFailed { node, .. } => Some(node),
            EngineError::Cancelled => None,
        }
    }

    /// Endpoint that failed, for call failures
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            EngineError::CallFailure { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }
}
