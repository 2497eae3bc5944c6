use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::client::HeaderPropagator;
use crate::config::spec::DEFAULT_SERVER_READ_SECS;
use crate::runtime::StepEngine;

/// Largest inbound body accepted by default (16 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: StepEngine,
    pub headers: Arc<HeaderPropagator>,
    /// Budget for one whole graph execution
    pub request_budget: Option<Duration>,
    /// Time allowed to receive the inbound body
    pub body_read_timeout: Duration,
    /// Inbound bodies larger than this are rejected with 413
    pub max_body_bytes: usize,
    pub active_requests: Arc<DashMap<Uuid, Instant>>,
    shutting_down: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(engine: StepEngine) -> Self {
        Self {
            engine,
            headers: Arc::new(HeaderPropagator::default()),
            request_budget: None,
            body_read_timeout: Duration::from_secs(DEFAULT_SERVER_READ_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            active_requests: Arc::new(DashMap::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_header_propagator(mut self, headers: HeaderPropagator) -> Self {
        self.headers = Arc::new(headers);
        self
    }

    pub fn with_request_budget(mut self, budget: Option<Duration>) -> Self {
        self.request_budget = budget;
        self
    }

    pub fn with_body_read_timeout(mut self, timeout: Duration) -> Self {
        self.body_read_timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Register an active request; it is removed when the returned guard drops
    pub fn track_request(&self, id: Uuid) -> RequestGuard {
        self.active_requests.insert(id, Instant::now());
        RequestGuard {
            id,
            active_requests: Arc::clone(&self.active_requests),
        }
    }

    /// Get active request count
    pub fn active_request_count(&self) -> usize {
        self.active_requests.len()
    }

    /// Age of the oldest in-flight request
    pub fn oldest_request_age(&self) -> Option<Duration> {
        self.active_requests
            .iter()
            .map(|entry| entry.value().elapsed())
            .max()
    }

    /// Fail readiness from now on
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Removes a request from the active set when the handler finishes or is dropped
pub struct RequestGuard {
    id: Uuid,
    active_requests: Arc<DashMap<Uuid, Instant>>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.active_requests.remove(&self.id);
    }
}
