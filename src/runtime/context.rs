use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Request-scoped state handed down every step of one execution tree
#[derive(Debug, Clone)]
pub struct StepContext {
    request_id: Uuid,
    headers: Arc<HeaderMap>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl StepContext {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            headers: Arc::new(HeaderMap::new()),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Headers attached to every outbound call
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Arc::new(headers);
        self
    }

    /// Bound the whole execution tree by `budget`, starting now.
    ///
    /// A budget too large to represent as a deadline leaves the execution unbounded.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.deadline = Instant::now().checked_add(budget);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Context for a spawned sub-task: cancelled with its parent, cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            headers: Arc::clone(&self.headers),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Effective timeout for one outbound call
    pub fn call_timeout(&self, per_call: Option<Duration>) -> Option<Duration> {
        match (per_call, self.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_context() {
        let ctx = StepContext::new(Uuid::new_v4());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
        assert_eq!(ctx.call_timeout(None), None);
        assert_eq!(
            ctx.call_timeout(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_call_timeout_takes_the_smaller_bound() {
        let ctx = StepContext::new(Uuid::new_v4()).with_budget(Duration::from_secs(2));
        let timeout = ctx.call_timeout(Some(Duration::from_secs(30))).unwrap();
        assert!(timeout <= Duration::from_secs(2));

        let timeout = ctx.call_timeout(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_zero_budget_is_expired() {
        let ctx = StepContext::new(Uuid::new_v4()).with_budget(Duration::ZERO);
        assert!(ctx.is_expired());
    }

    #[test]
    fn test_unrepresentable_budget_is_unbounded() {
        let ctx = StepContext::new(Uuid::new_v4()).with_budget(Duration::from_secs(u64::MAX));
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
        assert_eq!(
            ctx.call_timeout(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_parent_cancellation_reaches_children() {
        let parent = StepContext::new(Uuid::new_v4());
        let child = parent.child();
        let grandchild = child.child();

        parent.cancellation().cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_cancellation_stays_local() {
        let parent = StepContext::new(Uuid::new_v4());
        let child = parent.child();

        child.cancellation().cancel();
        assert!(!parent.is_cancelled());
    }
}
