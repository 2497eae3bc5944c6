pub mod headers;
pub mod mesh;
pub mod service;

pub use headers::{HeaderPatternError, HeaderPropagator};
pub use mesh::MeshDetector;
pub use service::{CallError, HttpServiceClient, ServiceCaller};
