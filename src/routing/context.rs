//! Per-request execution context.
//!
//! # Responsibilities
//! - Carry the request id and matched URL parameters
//! - Carry the effective deadline and its cancellation signal
//! - Carry the breaker-trip marker handlers use to report failure
//! - Carry the outcome chosen by whichever layer resolved the request
//!
//! # Design Decisions
//! - Clones share one inner record, so a marker set by the handler is seen
//!   by the breaker after the handler returns
//! - Deadlines narrow in child scopes; cancellation flows parent to child
//! - Cancellation is advisory: handlers that poll it may stop early

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// How a request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Outcome {
    /// The handler ran to completion and produced the response.
    Completed = 0,
    /// The deadline fired first; the enforcer wrote the response.
    TimedOut = 1,
    /// The breaker was open; the handler was never invoked.
    Rejected = 2,
    /// The handler task panicked.
    Panicked = 3,
}

impl Outcome {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Outcome::TimedOut,
            2 => Outcome::Rejected,
            3 => Outcome::Panicked,
            _ => Outcome::Completed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::TimedOut => "timed_out",
            Outcome::Rejected => "rejected",
            Outcome::Panicked => "panicked",
        }
    }
}

#[derive(Debug)]
struct Shared {
    request_id: String,
    params: Vec<(String, String)>,
    breaker_tripped: AtomicBool,
    outcome: AtomicU8,
}

/// Request-scoped data shared by every layer of the chain.
#[derive(Debug, Clone)]
pub struct RequestContext {
    shared: Arc<Shared>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a root context for one request.
    pub fn new(request_id: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            shared: Arc::new(Shared {
                request_id: request_id.into(),
                params,
                breaker_tripped: AtomicBool::new(false),
                outcome: AtomicU8::new(Outcome::Completed as u8),
            }),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.shared.request_id
    }

    /// Value of a matched path parameter, e.g. `id` for `/items/{id}`.
    pub fn url_param(&self, key: &str) -> Option<&str> {
        self.shared
            .params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Mark this request's outcome as a failure for the circuit breaker.
    pub fn trip_breaker(&self) {
        self.shared.breaker_tripped.store(true, Ordering::Release);
    }

    pub fn breaker_tripped(&self) -> bool {
        self.shared.breaker_tripped.load(Ordering::Acquire)
    }

    /// Effective deadline, if one is enforced for this scope.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves when the request is cancelled or its deadline fired.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::from_u8(self.shared.outcome.load(Ordering::Acquire))
    }

    pub(crate) fn set_outcome(&self, outcome: Outcome) {
        self.shared.outcome.store(outcome as u8, Ordering::Release);
    }

    /// Child scope bound to `deadline`. Never extends an existing deadline.
    pub(crate) fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            shared: Arc::clone(&self.shared),
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn context() -> RequestContext {
        RequestContext::new("req-1", vec![("id".to_string(), "42".to_string())])
    }

    #[test]
    fn test_url_params() {
        let cx = context();
        assert_eq!(cx.request_id(), "req-1");
        assert_eq!(cx.url_param("id"), Some("42"));
        assert_eq!(cx.url_param("missing"), None);
    }

    #[test]
    fn test_trip_is_visible_through_clones() {
        let cx = context();
        let handler_view = cx.clone();
        assert!(!cx.breaker_tripped());

        handler_view.trip_breaker();
        assert!(cx.breaker_tripped());
    }

    #[tokio::test]
    async fn test_child_scope_shares_marker_and_narrows_deadline() {
        let cx = context();
        let now = Instant::now();
        let outer = cx.with_deadline(now + Duration::from_secs(2));
        let inner = outer.with_deadline(now + Duration::from_secs(5));

        assert_eq!(inner.deadline(), Some(now + Duration::from_secs(2)));

        inner.trip_breaker();
        inner.set_outcome(Outcome::TimedOut);
        assert!(cx.breaker_tripped());
        assert_eq!(cx.outcome(), Outcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancellation_flows_to_children_only() {
        let cx = context();
        let child = cx.with_deadline(Instant::now() + Duration::from_secs(1));

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!cx.is_cancelled());

        let other = cx.with_deadline(Instant::now() + Duration::from_secs(1));
        cx.cancel();
        other.cancelled().await;
        assert!(other.is_cancelled());
    }
}
