pub mod aggregate;
pub mod context;
pub mod engine;
pub mod error;
pub mod selector;

pub use aggregate::{aggregate, combine_route_responses, AggregationError, AggregationPolicy};
pub use context::StepContext;
pub use engine::{EngineConfig, StepEngine, DEFAULT_MAX_CONCURRENCY};
pub use error::EngineError;
pub use selector::{
    condition_matches, pick_by_condition, pick_weighted, DefaultSelector, RouteSelector,
};
