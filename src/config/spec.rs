use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{DataMode, Edge, Endpoint, Graph, GraphError, Node, RouterType};

/// Default inbound body read timeout, in seconds
pub const DEFAULT_SERVER_READ_SECS: u64 = 60;
/// Default inbound response timeout, in seconds
pub const DEFAULT_SERVER_WRITE_SECS: u64 = 60;

#[derive(Error, Debug, PartialEq)]
pub enum GraphSpecError {
    #[error("JSON parse error: {0}")]
    Json(String),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),
}

/// Serialized graph definition, as supplied by whoever deploys the router
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSpec {
    /// Entry node name
    #[serde(default)]
    pub root: Option<String>,

    pub nodes: BTreeMap<String, NodeSpec>,

    /// Request budget in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub router_timeouts: Option<RouterTimeouts>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub router_type: RouterType,

    #[serde(default)]
    pub routes: Vec<RouteSpec>,

    #[serde(default)]
    pub successors: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub service_url: String,

    /// Aggregation label; the URL host when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Splitter traffic share
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    /// Switch condition: a dotted path or JSON pointer that must exist in the input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSpec {
    pub node_name: String,

    #[serde(default)]
    pub data: DataMode,
}

/// Timeouts in seconds; unset fields fall back to defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterTimeouts {
    #[serde(default)]
    pub server_read: Option<u64>,

    #[serde(default)]
    pub server_write: Option<u64>,

    #[serde(default)]
    pub service_client: Option<u64>,
}

/// Timeouts with defaults applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimeouts {
    pub server_read: Duration,
    pub server_write: Duration,
    pub service_client: Option<Duration>,
    pub request_budget: Option<Duration>,
}

/// On-disk encoding of a graph definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    /// JSON, with `//` and `/* */` comments allowed
    Json,
    Yaml,
}

impl GraphFormat {
    /// Pick the format from a file extension; anything not YAML is read as JSON
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext.map(str::to_ascii_lowercase).as_deref() {
            Some("yaml") | Some("yml") => GraphFormat::Yaml,
            _ => GraphFormat::Json,
        }
    }
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Strip C-style comments from JSONC content, leaving string literals untouched.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                result.push(c);
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
                result.push(c);
            }
            '/' if !in_string && chars.peek() == Some(&'/') => {
                for nc in chars.by_ref() {
                    if nc == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            '/' if !in_string && chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for nc in chars.by_ref() {
                    if prev == '*' && nc == '/' {
                        break;
                    }
                    prev = nc;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

/// Parse a graph definition
pub fn parse_graph_spec(content: &str, format: GraphFormat) -> Result<GraphSpec, GraphSpecError> {
    match format {
        GraphFormat::Json => serde_json::from_str(&strip_jsonc_comments(content))
            .map_err(|e| GraphSpecError::Json(e.to_string())),
        GraphFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| GraphSpecError::Yaml(e.to_string()))
        }
    }
}

impl GraphSpec {
    /// Parse JSON (or JSONC) and check that it builds into a valid graph
    pub fn from_json(content: &str) -> Result<Self, GraphSpecError> {
        let spec = parse_graph_spec(content, GraphFormat::Json)?;
        spec.to_graph(None)?;
        Ok(spec)
    }

    /// Entry node: `entry_override` when given, else the `root` field
    pub fn entry<'a>(&'a self, entry_override: Option<&'a str>) -> Option<&'a str> {
        entry_override.or(self.root.as_deref())
    }

    /// Build and validate the in-memory graph
    pub fn to_graph(&self, entry_override: Option<&str>) -> Result<Graph, GraphError> {
        let mut builder = Graph::builder();

        for (name, spec) in &self.nodes {
            let mut node = Node::new(name.clone(), spec.router_type);
            for route in &spec.routes {
                let mut endpoint = Endpoint::parse(&route.service_url)?;
                if let Some(label) = &route.name {
                    endpoint = endpoint.with_label(label.clone());
                }
                if let Some(weight) = route.weight {
                    endpoint = endpoint.with_weight(weight);
                }
                if let Some(condition) = &route.condition {
                    endpoint = endpoint.with_condition(condition.clone());
                }
                node = node.route(endpoint);
            }
            for edge in &spec.successors {
                node = node.successor(Edge::new(edge.node_name.clone(), edge.data));
            }
            builder = builder.node(node);
        }

        if let Some(entry) = self.entry(entry_override) {
            builder = builder.entry(entry);
        }
        builder.build()
    }

    pub fn timeouts(&self) -> ResolvedTimeouts {
        let configured = self.router_timeouts.clone().unwrap_or_default();
        ResolvedTimeouts {
            server_read: Duration::from_secs(
                configured.server_read.unwrap_or(DEFAULT_SERVER_READ_SECS),
            ),
            server_write: Duration::from_secs(
                configured.server_write.unwrap_or(DEFAULT_SERVER_WRITE_SECS),
            ),
            service_client: configured.service_client.map(Duration::from_secs),
            request_budget: self.timeout.map(Duration::from_secs),
        }
    }
}
