//! In-memory routing graph.
//!
//! A [`Graph`] is an arena of [`Node`]s addressed by [`NodeId`] plus a name index and an
//! explicit entry node. It is built once, validated, and then shared read-only between every
//! in-flight request.

use std::collections::HashMap;
use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

mod validation;

pub use validation::{check_acyclic, check_route_conditions, check_route_weights, TOTAL_ROUTE_WEIGHT};

/// Index of a node inside a [`Graph`] arena
pub type NodeId = usize;

#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Duplicate node name: '{0}'")]
    DuplicateNode(String),

    #[error("Node '{0}' has no routes")]
    NoRoutes(String),

    #[error("No entry node configured")]
    MissingEntry,

    #[error("Entry node '{0}' is not defined")]
    UnknownEntry(String),

    #[error("Invalid service url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Route weights are only allowed on Splitter nodes (node '{0}')")]
    WeightOnNonSplitter(String),

    #[error("Invalid route weights in node '{node}': {reason}")]
    InvalidWeights { node: String, reason: String },

    #[error("Route conditions are only allowed on Switch nodes (node '{0}')")]
    ConditionOnNonSwitch(String),

    #[error("Route {route} of Switch node '{node}' has no condition")]
    MissingCondition { node: String, route: String },

    #[error("Graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// How a node dispatches to its routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RouterType {
    /// Call the first route
    #[serde(alias = "Sequence")]
    Sequential,
    /// Call every route concurrently and merge the responses
    Ensemble,
    /// Call one route picked by externally supplied weights
    Splitter,
    /// Call the first route whose condition matches the input
    Switch,
}

impl fmt::Display for RouterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouterType::Sequential => "Sequential",
            RouterType::Ensemble => "Ensemble",
            RouterType::Splitter => "Splitter",
            RouterType::Switch => "Switch",
        };
        f.write_str(name)
    }
}

/// Which payload a successor receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum DataMode {
    /// The payload the current node was invoked with
    #[default]
    #[serde(rename = "$request", alias = "ForwardOriginalInput")]
    ForwardOriginalInput,
    /// The current node's aggregated output
    #[serde(rename = "$response", alias = "ForwardAggregatedOutput")]
    ForwardAggregatedOutput,
}

/// One downstream model-serving endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    url: Url,
    label: String,
    weight: Option<u32>,
    condition: Option<String>,
}

impl Endpoint {
    /// Parse an absolute http(s) URL. The aggregation label defaults to the URL host.
    pub fn parse(raw: &str) -> Result<Self, GraphError> {
        let invalid = |reason: &str| GraphError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid("scheme must be http or https"));
        }
        let label = host_label(&url).ok_or_else(|| invalid("missing host"))?;

        Ok(Self {
            url,
            label,
            weight: None,
            condition: None,
        })
    }

    /// Override the aggregation label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Path into the JSON input that must exist for a Switch to pick this route
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn weight(&self) -> Option<u32> {
        self.weight
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Host component of a URL, with the port appended when one is given explicitly.
pub fn host_label(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Directed link to a successor node
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub target: String,
    pub data_mode: DataMode,
}

impl Edge {
    pub fn new(target: impl Into<String>, data_mode: DataMode) -> Self {
        Self {
            target: target.into(),
            data_mode,
        }
    }
}

/// One routing decision point
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub router_type: RouterType,
    pub routes: Vec<Endpoint>,
    pub successors: Vec<Edge>,
}

impl Node {
    pub fn new(name: impl Into<String>, router_type: RouterType) -> Self {
        Self {
            name: name.into(),
            router_type,
            routes: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn route(mut self, endpoint: Endpoint) -> Self {
        self.routes.push(endpoint);
        self
    }

    pub fn successor(mut self, edge: Edge) -> Self {
        self.successors.push(edge);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.successors.is_empty()
    }
}

/// Validated, immutable routing graph
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    entry: NodeId,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Look up a node by name
    pub fn resolve(&self, name: &str) -> Option<(NodeId, &Node)> {
        self.index.get(name).map(|&id| (id, &self.nodes[id]))
    }

    /// Node stored at `id`. Ids only come from this graph, so the index is always in bounds.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn entry_node(&self) -> &Node {
        &self.nodes[self.entry]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Validate the structure and freeze it into a [`Graph`]
    pub fn build(self) -> Result<Graph, GraphError> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (id, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name.clone(), id).is_some() {
                return Err(GraphError::DuplicateNode(node.name.clone()));
            }
        }

        for node in &self.nodes {
            if node.routes.is_empty() {
                return Err(GraphError::NoRoutes(node.name.clone()));
            }
            check_route_weights(node)?;
            check_route_conditions(node)?;
            for edge in &node.successors {
                if !index.contains_key(&edge.target) {
                    warn!(
                        "Node '{}' has a successor '{}' that is not defined; it will be skipped",
                        node.name, edge.target
                    );
                }
            }
        }

        let entry_name = self.entry.ok_or(GraphError::MissingEntry)?;
        let entry = *index
            .get(&entry_name)
            .ok_or(GraphError::UnknownEntry(entry_name))?;

        check_acyclic(&self.nodes, &index)?;

        Ok(Graph {
            nodes: self.nodes,
            index,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> Endpoint {
        Endpoint::parse(url).unwrap()
    }

    #[test]
    fn test_endpoint_label_is_host() {
        let ep = endpoint("http://model-a.default.svc/v1/models/a:predict");
        assert_eq!(ep.label(), "model-a.default.svc");
    }

    #[test]
    fn test_endpoint_label_keeps_explicit_port() {
        let ep = endpoint("http://127.0.0.1:9001/predict");
        assert_eq!(ep.label(), "127.0.0.1:9001");
    }

    #[test]
    fn test_endpoint_label_override() {
        let ep = endpoint("http://127.0.0.1:9001/predict").with_label("model1");
        assert_eq!(ep.label(), "model1");
    }

    #[test]
    fn test_endpoint_rejects_relative_and_non_http() {
        assert!(matches!(
            Endpoint::parse("/v1/models"),
            Err(GraphError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Endpoint::parse("ftp://host/file"),
            Err(GraphError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_resolve_by_name() {
        let graph = Graph::builder()
            .node(Node::new("root", RouterType::Sequential).route(endpoint("http://a")))
            .entry("root")
            .build()
            .unwrap();

        let (id, node) = graph.resolve("root").unwrap();
        assert_eq!(id, graph.entry());
        assert_eq!(node.router_type, RouterType::Sequential);
        assert!(graph.resolve("missing").is_none());
    }

    #[test]
    fn test_build_requires_entry() {
        let result = Graph::builder()
            .node(Node::new("root", RouterType::Sequential).route(endpoint("http://a")))
            .build();
        assert_eq!(result.unwrap_err(), GraphError::MissingEntry);

        let result = Graph::builder()
            .node(Node::new("root", RouterType::Sequential).route(endpoint("http://a")))
            .entry("start")
            .build();
        assert_eq!(result.unwrap_err(), GraphError::UnknownEntry("start".into()));
    }

    #[test]
    fn test_build_rejects_empty_routes() {
        let result = Graph::builder()
            .node(Node::new("root", RouterType::Ensemble))
            .entry("root")
            .build();
        assert_eq!(result.unwrap_err(), GraphError::NoRoutes("root".into()));
    }

    #[test]
    fn test_build_rejects_duplicates() {
        let result = Graph::builder()
            .node(Node::new("root", RouterType::Sequential).route(endpoint("http://a")))
            .node(Node::new("root", RouterType::Sequential).route(endpoint("http://b")))
            .entry("root")
            .build();
        assert_eq!(result.unwrap_err(), GraphError::DuplicateNode("root".into()));
    }

    #[test]
    fn test_build_accepts_unresolved_edge() {
        let graph = Graph::builder()
            .node(
                Node::new("root", RouterType::Sequential)
                    .route(endpoint("http://a"))
                    .successor(Edge::new("ghost", DataMode::ForwardOriginalInput)),
            )
            .entry("root")
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn test_data_mode_serde_names() {
        let mode: DataMode = serde_json::from_str(r#""$response""#).unwrap();
        assert_eq!(mode, DataMode::ForwardAggregatedOutput);
        let mode: DataMode = serde_json::from_str(r#""ForwardOriginalInput""#).unwrap();
        assert_eq!(mode, DataMode::ForwardOriginalInput);
    }

    #[test]
    fn test_switch_routes_need_conditions() {
        let result = Graph::builder()
            .node(
                Node::new("root", RouterType::Switch)
                    .route(endpoint("http://a").with_condition("instances"))
                    .route(endpoint("http://b")),
            )
            .entry("root")
            .build();
        assert_eq!(
            result.unwrap_err(),
            GraphError::MissingCondition {
                node: "root".into(),
                route: "http://b/".into()
            }
        );
    }

    #[test]
    fn test_router_type_accepts_sequence_alias() {
        let rt: RouterType = serde_json::from_str(r#""Sequence""#).unwrap();
        assert_eq!(rt, RouterType::Sequential);
    }
}
