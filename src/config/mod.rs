pub mod spec;

pub use spec::{
    parse_graph_spec, strip_jsonc_comments, EdgeSpec, GraphFormat, GraphSpec, GraphSpecError,
    NodeSpec, ResolvedTimeouts, RouteSpec, RouterTimeouts,
};

use std::path::Path;
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Graph definition error: {0}")]
    SpecError(#[from] GraphSpecError),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load and parse a graph definition from disk.
/// The format follows the file extension (`.yaml`/`.yml`, otherwise JSON/JSONC).
pub fn load_graph_file(path: &Path) -> Result<GraphSpec, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let format = GraphFormat::from_extension(path.extension().and_then(|e| e.to_str()));
    let spec = parse_graph_spec(&content, format)?;
    Ok(spec)
}
