use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use graphrouter::cli::{format_dry_run, Args};
use graphrouter::client::{HeaderPropagator, HttpServiceClient, MeshDetector};
use graphrouter::config::{load_graph_file, parse_graph_spec, GraphFormat, GraphSpec};
use graphrouter::runtime::{AggregationPolicy, EngineConfig, StepEngine};
use graphrouter::server::{apply_layers, create_router, shutdown_signal, AppState};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    // Load the graph definition
    let spec = match load_spec(&args) {
        Ok(spec) => spec,
        Err(e) => {
            error!("Failed to load graph {}: {}", args.graph_source(), e);
            process::exit(1);
        }
    };

    let graph = match spec.to_graph(args.entry_node.as_deref()) {
        Ok(graph) => graph,
        Err(e) => {
            error!("Invalid graph {}: {}", args.graph_source(), e);
            process::exit(1);
        }
    };
    let timeouts = spec.timeouts();

    // Dry-run mode: print graph info and exit
    if args.dry_run {
        let output = format_dry_run(&graph, &timeouts, &args);
        println!("{}", output);
        return;
    }

    let propagator = match args.propagate_headers.as_deref() {
        Some(list) => {
            let (propagator, errors) = HeaderPropagator::from_list(list);
            for e in errors {
                error!("{}", e);
            }
            propagator
        }
        None => HeaderPropagator::default(),
    };

    let mut client = HttpServiceClient::new();
    if !args.no_mesh_probe {
        client = client.with_mesh_detector(Arc::new(MeshDetector::default()));
    }

    let aggregation = if args.strict_aggregation {
        AggregationPolicy::Strict
    } else {
        AggregationPolicy::Tolerant
    };
    let config = EngineConfig {
        max_concurrency: args.max_concurrency,
        call_timeout: timeouts.service_client,
        aggregation,
    };

    let node_count = graph.len();
    let entry = graph.entry_node().name.clone();
    let engine = StepEngine::new(Arc::new(graph), Arc::new(client), config);

    // Create application state
    let state = AppState::new(engine)
        .with_header_propagator(propagator)
        .with_request_budget(timeouts.request_budget)
        .with_body_read_timeout(timeouts.server_read)
        .with_max_body_bytes(args.max_body_bytes);

    let bind_addr = args.bind_addr.as_deref().unwrap_or("0.0.0.0");
    let addr = format!("{}:{}", bind_addr, args.port);

    info!("Starting graphrouter on {}", addr);
    info!("Loaded {} nodes, entry node '{}'", node_count, entry);
    if timeouts.request_budget.is_none() {
        warn!("No request timeout configured; executions are bounded only by the write timeout");
    }

    let app = apply_layers(create_router(state.clone()), timeouts.server_write);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            process::exit(1);
        }
    };

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health - Liveness check");
    info!("  GET  /readyz - Readiness check");
    info!("  GET  /status - Graph status");
    info!("  POST /       - Execute the graph");

    let drain = Duration::from_secs(args.drain_seconds);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state, drain))
        .await
    {
        error!("Server error: {}", e);
        process::exit(1);
    }

    info!("Server stopped");
}

fn load_spec(args: &Args) -> anyhow::Result<GraphSpec> {
    if let Some(path) = &args.graph_file {
        return Ok(load_graph_file(path)?);
    }
    let json = args
        .graph_json
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no graph file or --graph-json given"))?;
    Ok(parse_graph_spec(json, GraphFormat::Json)?)
}
