use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::runtime::DEFAULT_MAX_CONCURRENCY;
use crate::server::DEFAULT_MAX_BODY_BYTES;

/// Default listen port for the router
pub const DEFAULT_PORT: u16 = 8080;

/// Seconds to keep serving after a shutdown signal while readiness fails
pub const DEFAULT_DRAIN_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(name = "graphrouter")]
#[command(about = "Route inference requests through a graph of model-serving endpoints")]
#[command(version)]
pub struct Args {
    /// Path to the graph definition (JSON, JSONC or YAML)
    #[arg(required_unless_present = "graph_json", conflicts_with = "graph_json")]
    pub graph_file: Option<PathBuf>,

    /// Inline graph definition as JSON
    #[arg(long, value_name = "JSON", env = "GRAPH_JSON")]
    pub graph_json: Option<String>,

    /// Entry node, overriding the graph's `root` field
    #[arg(long, value_name = "NAME")]
    pub entry_node: Option<String>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: validate the graph and print it without serving
    #[arg(long)]
    pub dry_run: bool,

    /// Address to bind the HTTP server to
    #[arg(long, value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Path to a .env file to load before reading other settings
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Maximum concurrent outbound service calls
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Largest request body accepted, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Comma-separated regex patterns of request headers to forward downstream
    #[arg(long, value_name = "PATTERNS", env = "PROPAGATE_HEADERS")]
    pub propagate_headers: Option<String>,

    /// Fail a step when a response to be aggregated is not valid JSON
    #[arg(long)]
    pub strict_aggregation: bool,

    /// Skip detecting a service mesh sidecar (keeps https routes as-is)
    #[arg(long)]
    pub no_mesh_probe: bool,

    /// Seconds to drain in-flight requests after a shutdown signal
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_DRAIN_SECS)]
    pub drain_seconds: u64,
}

impl Args {
    /// Where the graph came from, for log and dry-run output
    pub fn graph_source(&self) -> String {
        match &self.graph_file {
            Some(path) => path.display().to_string(),
            None => "--graph-json".to_string(),
        }
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::ResolvedTimeouts;
use crate::graph::Graph;

/// Format a dry-run output showing the graph structure.
/// Pure function - returns a formatted string.
pub fn format_dry_run(graph: &Graph, timeouts: &ResolvedTimeouts, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "graphrouter v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Graph: {}\n", args.graph_source()));
    output.push_str(&format!("Entry: {}\n\n", graph.entry_node().name));

    output.push_str(&format!("Nodes ({}):\n", graph.len()));
    for node in graph.nodes() {
        output.push_str(&format!("  [{}] {}\n", node.name, node.router_type));
        for route in &node.routes {
            output.push_str(&format!("    route {} ({})", route, route.label()));
            if let Some(weight) = route.weight() {
                output.push_str(&format!(" weight={}", weight));
            }
            if let Some(condition) = route.condition() {
                output.push_str(&format!(" when {}", condition));
            }
            output.push('\n');
        }
        for edge in &node.successors {
            let mode = match edge.data_mode {
                crate::graph::DataMode::ForwardOriginalInput => "$request",
                crate::graph::DataMode::ForwardAggregatedOutput => "$response",
            };
            output.push_str(&format!("    -> {} ({})", edge.target, mode));
            if graph.resolve(&edge.target).is_none() {
                output.push_str(" [unresolved, skipped]");
            }
            output.push('\n');
        }
    }
    output.push('\n');

    output.push_str("Timeouts:\n");
    output.push_str(&format!("  server read:  {}s\n", timeouts.server_read.as_secs()));
    output.push_str(&format!("  server write: {}s\n", timeouts.server_write.as_secs()));
    match timeouts.service_client {
        Some(d) => output.push_str(&format!("  service call: {}s\n", d.as_secs())),
        None => output.push_str("  service call: none\n"),
    }
    match timeouts.request_budget {
        Some(d) => output.push_str(&format!("  request:      {}s\n", d.as_secs())),
        None => output.push_str("  request:      none\n"),
    }

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to serve. Remove --dry-run to start the router.\n");

    output
}
