//! Step execution engine.
//!
//! One step runs one node: it dispatches the node's route calls, joins them, builds the node
//! output, then fans out to every resolvable successor and joins those. Every sibling call and
//! every successor step is its own tokio task; a step only suspends at its two join points.
//!
//! Failure policy: the first failing sibling aborts the step. Dropping the step's `JoinSet`
//! aborts the remaining siblings, which in turn drops their own sub-tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::client::{CallError, ServiceCaller};
use crate::graph::{DataMode, Endpoint, Graph, Node, NodeId, RouterType};
use crate::runtime::aggregate::{aggregate, combine_route_responses, AggregationPolicy};
use crate::runtime::context::StepContext;
use crate::runtime::error::EngineError;
use crate::runtime::selector::{DefaultSelector, RouteSelector};

/// Default cap on concurrent outbound calls
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Outbound calls allowed in flight at once across all requests
    pub max_concurrency: usize,
    /// Per-call timeout, further bounded by the request deadline
    pub call_timeout: Option<Duration>,
    pub aggregation: AggregationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            call_timeout: None,
            aggregation: AggregationPolicy::default(),
        }
    }
}

/// Executes requests against a shared, immutable [`Graph`]
#[derive(Clone)]
pub struct StepEngine {
    graph: Arc<Graph>,
    caller: Arc<dyn ServiceCaller>,
    selector: Arc<dyn RouteSelector>,
    limiter: Arc<Semaphore>,
    config: EngineConfig,
}

impl StepEngine {
    pub fn new(graph: Arc<Graph>, caller: Arc<dyn ServiceCaller>, config: EngineConfig) -> Self {
        Self {
            graph,
            caller,
            selector: Arc::new(DefaultSelector),
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    /// Replace the Splitter/Switch route selector
    pub fn with_selector(mut self, selector: Arc<dyn RouteSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute the graph from its entry node
    pub async fn run(&self, input: Bytes, ctx: StepContext) -> Result<Bytes, EngineError> {
        self.execute(self.graph.entry(), input, ctx).await
    }

    /// Execute one node and, recursively, its successors.
    ///
    /// Boxed so steps can spawn steps.
    pub fn execute(
        &self,
        id: NodeId,
        input: Bytes,
        ctx: StepContext,
    ) -> BoxFuture<'static, Result<Bytes, EngineError>> {
        let engine = self.clone();
        async move { engine.run_step(id, input, ctx).await }.boxed()
    }

    async fn run_step(
        &self,
        id: NodeId,
        input: Bytes,
        ctx: StepContext,
    ) -> Result<Bytes, EngineError> {
        let node = self.graph.node(id);
        let started = Instant::now();
        debug!(
            node = %node.name,
            router = %node.router_type,
            routes = node.routes.len(),
            "Dispatching step"
        );

        let responses = self.dispatch(node, &input, &ctx).await?;
        let node_output =
            combine_route_responses(node.router_type, responses, self.config.aggregation)
                .map_err(|source| EngineError::AggregationFailure {
                    node: node.name.clone(),
                    source,
                })?;

        let result = if node.is_terminal() {
            Ok(node_output)
        } else {
            self.forward(node, input, node_output, &ctx).await
        };

        info!(
            node = %node.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Step finished"
        );
        result
    }

    // ------------------------------------------------------------------------
    // Dispatching / Joining
    // ------------------------------------------------------------------------

    async fn dispatch(
        &self,
        node: &Node,
        input: &Bytes,
        ctx: &StepContext,
    ) -> Result<Vec<(String, Bytes)>, EngineError> {
        let route = match node.router_type {
            RouterType::Ensemble => return self.call_all(node, input, ctx).await,
            RouterType::Sequential => node.routes.first(),
            RouterType::Splitter | RouterType::Switch => self.selector.select(node, input),
        };
        let route = route.ok_or_else(|| EngineError::NoRouteMatched {
            node: node.name.clone(),
        })?;

        let body = self.call_route(&node.name, route, input.clone(), ctx).await?;
        Ok(vec![(route.label().to_string(), body)])
    }

    /// Call every route of an Ensemble node concurrently with the same payload
    async fn call_all(
        &self,
        node: &Node,
        input: &Bytes,
        ctx: &StepContext,
    ) -> Result<Vec<(String, Bytes)>, EngineError> {
        let mut tasks = JoinSet::new();
        for (slot, route) in node.routes.iter().enumerate() {
            let engine = self.clone();
            let node_name = node.name.clone();
            let route = route.clone();
            let body = input.clone();
            let ctx = ctx.child();
            tasks.spawn(async move {
                let result = engine.call_route(&node_name, &route, body, &ctx).await;
                (slot, result)
            });
        }

        let bodies = join_slots(&mut tasks, node.routes.len(), &node.name).await?;

        // Route order, not completion order, decides which duplicate label wins
        Ok(node
            .routes
            .iter()
            .zip(bodies)
            .map(|(route, body)| (route.label().to_string(), body))
            .collect())
    }

    async fn call_route(
        &self,
        node: &str,
        route: &Endpoint,
        body: Bytes,
        ctx: &StepContext,
    ) -> Result<Bytes, EngineError> {
        let _permit = tokio::select! {
            permit = self.limiter.acquire() => permit.map_err(|_| EngineError::Cancelled)?,
            _ = ctx.cancelled() => return Err(EngineError::Cancelled),
        };

        if ctx.is_expired() {
            return Err(EngineError::DeadlineExceeded {
                node: node.to_string(),
            });
        }
        let timeout = ctx.call_timeout(self.config.call_timeout);

        let started = Instant::now();
        let result = tokio::select! {
            result = self.caller.call(route, body, ctx.headers(), timeout) => result,
            _ = ctx.cancelled() => return Err(EngineError::Cancelled),
        };
        info!(
            node = node,
            endpoint = %route,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Service call finished"
        );

        result.map_err(|source| {
            if source == CallError::Timeout && ctx.is_expired() {
                return EngineError::DeadlineExceeded {
                    node: node.to_string(),
                };
            }
            warn!("Call to {} in node '{}' failed: {}", route, node, source);
            EngineError::CallFailure {
                node: node.to_string(),
                endpoint: route.to_string(),
                source,
            }
        })
    }

    // ------------------------------------------------------------------------
    // Forwarding / Joining (successors)
    // ------------------------------------------------------------------------

    async fn forward(
        &self,
        node: &Node,
        input: Bytes,
        node_output: Bytes,
        ctx: &StepContext,
    ) -> Result<Bytes, EngineError> {
        let mut tasks = JoinSet::new();
        let mut labels = Vec::with_capacity(node.successors.len());

        for edge in &node.successors {
            let Some((target_id, target)) = self.graph.resolve(&edge.target) else {
                debug!(
                    "Skipping successor '{}' of node '{}': not defined in graph",
                    edge.target, node.name
                );
                continue;
            };

            let payload = match edge.data_mode {
                DataMode::ForwardOriginalInput => input.clone(),
                DataMode::ForwardAggregatedOutput => node_output.clone(),
            };

            let slot = labels.len();
            labels.push(target.name.clone());
            let step = self.execute(target_id, payload, ctx.child());
            tasks.spawn(async move { (slot, step.await) });
        }

        if labels.is_empty() {
            return Ok(node_output);
        }

        let results = join_slots(&mut tasks, labels.len(), &node.name).await?;

        aggregate(labels.into_iter().zip(results), self.config.aggregation).map_err(|source| {
            EngineError::AggregationFailure {
                node: node.name.clone(),
                source,
            }
        })
    }
}

/// Wait for every task of a fan-out, placing each result in its slot.
///
/// Returns on the first failure; the caller dropping the `JoinSet` aborts the rest.
async fn join_slots(
    tasks: &mut JoinSet<(usize, Result<Bytes, EngineError>)>,
    count: usize,
    node: &str,
) -> Result<Vec<Bytes>, EngineError> {
    let mut slots: Vec<Option<Bytes>> = vec![None; count];

    while let Some(joined) = tasks.join_next().await {
        let (slot, result) = joined.map_err(|e| task_failed(node, e))?;
        slots[slot] = Some(result?);
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| EngineError::TaskFailed {
                node: node.to_string(),
                message: "task finished without a result".to_string(),
            })
        })
        .collect()
}

fn task_failed(node: &str, e: JoinError) -> EngineError {
    if e.is_cancelled() {
        return EngineError::Cancelled;
    }
    EngineError::TaskFailed {
        node: node.to_string(),
        message: e.to_string(),
    }
}
