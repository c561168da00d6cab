//! Circuit breaker guarding registered routes.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: routes assumed unhealthy, requests fail fast with 503
//! - Half-Open: a limited number of trial requests test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive marked failures >= failure_threshold
//! Open → Half-Open: first request after the cooldown elapsed
//! Half-Open → Closed: consecutive trial successes >= success_threshold
//! Half-Open → Open: any trial failure or abandoned trial (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per router, shared by every route registered through it
//! - All state lives behind a single mutex owned by the breaker
//! - Failure is explicit: handlers call `RequestContext::trip_breaker`
//! - Results admitted before the latest transition are discarded
//! - A trial permit dropped without a result counts as a failed trial
//! - Trials still outstanding a full cooldown after Half-Open began are
//!   written off so new trials can be admitted

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use metrics::counter;
use tokio::time::Instant;

use crate::http::recorder::ResponseWriter;
use crate::routing::context::{Outcome, RequestContext};
use crate::routing::handler::{BoxHandler, Handler};

/// Body sent while the breaker is open.
pub const BREAKER_OPEN_BODY: &str = "Service unavailable";

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Consistent view of the breaker at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub trials_in_flight: u32,
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`].
///
/// Report the result with [`CircuitBreaker::record`]. A trial permit dropped
/// without a result (panic, client disconnect) counts as a failed trial.
#[derive(Debug)]
#[must_use = "an unrecorded trial permit counts as a failure"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this request was admitted as a Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker
                .settle(self.generation, self.trial, Verdict::Abandoned);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Failure,
    Abandoned,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    trials_in_flight: u32,
    /// When the current state was entered.
    changed_at: Instant,
    generation: u64,
}

/// Failure-counting circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// Thresholds below one are raised to one.
    pub fn new(failure_threshold: u32, success_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                trials_in_flight: 0,
                changed_at: Instant::now(),
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let st = self.lock();
        BreakerSnapshot {
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            consecutive_successes: st.consecutive_successes,
            trials_in_flight: st.trials_in_flight,
        }
    }

    /// Decide whether a request may reach the handler.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut st = self.lock();

        if st.state == CircuitState::Open {
            if st.changed_at.elapsed() < self.cooldown {
                return None;
            }
            self.transition(&mut st, CircuitState::HalfOpen);
        }

        if st.state == CircuitState::HalfOpen
            && st.trials_in_flight >= self.success_threshold
            && st.changed_at.elapsed() >= self.cooldown
        {
            tracing::warn!(
                trials = st.trials_in_flight,
                "Writing off trials that never reported"
            );
            st.generation += 1;
            st.trials_in_flight = 0;
            st.consecutive_successes = 0;
            st.changed_at = Instant::now();
        }

        let trial = match st.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if st.trials_in_flight < self.success_threshold => {
                st.trials_in_flight += 1;
                true
            }
            _ => return None,
        };
        Some(Permit {
            breaker: self,
            generation: st.generation,
            trial,
            settled: false,
        })
    }

    /// Report the outcome of an admitted request.
    pub fn record(&self, mut permit: Permit<'_>, failed: bool) {
        permit.settled = true;
        let verdict = if failed {
            Verdict::Failure
        } else {
            Verdict::Success
        };
        self.settle(permit.generation, permit.trial, verdict);
    }

    fn settle(&self, generation: u64, trial: bool, verdict: Verdict) {
        let mut st = self.lock();

        if generation != st.generation {
            tracing::debug!(?verdict, "Discarding breaker result from a previous state");
            return;
        }
        if trial {
            st.trials_in_flight = st.trials_in_flight.saturating_sub(1);
        }

        match (st.state, verdict) {
            (CircuitState::Closed, Verdict::Failure) => {
                st.consecutive_failures += 1;
                if st.consecutive_failures >= self.failure_threshold {
                    self.transition(&mut st, CircuitState::Open);
                }
            }
            (CircuitState::Closed, Verdict::Success) => st.consecutive_failures = 0,
            (CircuitState::Closed, Verdict::Abandoned) => {}
            (CircuitState::HalfOpen, Verdict::Failure) => {
                self.transition(&mut st, CircuitState::Open)
            }
            (CircuitState::HalfOpen, Verdict::Abandoned) => {
                tracing::warn!("Trial request ended without a result");
                self.transition(&mut st, CircuitState::Open);
            }
            (CircuitState::HalfOpen, Verdict::Success) => {
                st.consecutive_successes += 1;
                if st.consecutive_successes >= self.success_threshold {
                    self.transition(&mut st, CircuitState::Closed);
                }
            }
            (CircuitState::Open, _) => {}
        }
    }

    fn transition(&self, st: &mut BreakerState, to: CircuitState) {
        let from = st.state;
        if from == to {
            return;
        }

        tracing::info!(from = from.as_str(), to = to.as_str(), "Circuit state transition");
        counter!(
            "circuitbreaker_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);

        st.state = to;
        st.generation += 1;
        st.consecutive_failures = 0;
        st.consecutive_successes = 0;
        st.trials_in_flight = 0;
        st.changed_at = Instant::now();
    }
}

/// Middleware gating a handler behind a shared [`CircuitBreaker`].
pub struct Breaker {
    inner: BoxHandler,
    breaker: Arc<CircuitBreaker>,
}

impl Breaker {
    pub fn new(inner: BoxHandler, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

impl Handler for Breaker {
    fn call(
        &self,
        request: Request,
        cx: RequestContext,
        writer: ResponseWriter,
    ) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        let breaker = Arc::clone(&self.breaker);

        Box::pin(async move {
            let Some(permit) = breaker.try_acquire() else {
                tracing::warn!(request_id = %cx.request_id(), "Circuit open, rejecting request");
                cx.set_outcome(Outcome::Rejected);
                if let Err(e) = writer.write_text(StatusCode::SERVICE_UNAVAILABLE, BREAKER_OPEN_BODY) {
                    tracing::warn!(request_id = %cx.request_id(), error = %e, "Failed to write breaker response");
                }
                return;
            };

            inner.call(request, cx.clone(), writer).await;
            breaker.record(permit, cx.breaker_tripped());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(f: u32, s: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(f, s, Duration::from_secs(cooldown_secs))
    }

    fn fail(cb: &CircuitBreaker) {
        let permit = cb.try_acquire().expect("should be admitted");
        cb.record(permit, true);
    }

    fn succeed(cb: &CircuitBreaker) {
        let permit = cb.try_acquire().expect("should be admitted");
        cb.record(permit, false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, 2, 15);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3, 2, 15);
        fail(&cb);
        fail(&cb);
        succeed(&cb);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown_then_closes() {
        let cb = breaker(1, 2, 15);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(cb.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().consecutive_successes, 1);

        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(
            cb.snapshot(),
            BreakerSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                trials_in_flight: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_and_restarts_cooldown() {
        let cb = breaker(1, 2, 10);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cb.try_acquire().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_trials() {
        let cb = breaker(1, 2, 1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;

        let first = cb.try_acquire().expect("first trial");
        let _second = cb.try_acquire().expect("second trial");
        assert!(cb.try_acquire().is_none());

        cb.record(first, false);
        assert_eq!(cb.snapshot().trials_in_flight, 1);
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_results_are_discarded() {
        let cb = breaker(1, 1, 5);
        let slow = cb.try_acquire().unwrap();
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Admitted before the breaker opened; must not count now.
        cb.record(slow, true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens_breaker() {
        let cb = breaker(1, 1, 5);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = cb.try_acquire().expect("trial admitted");
        assert!(trial.is_trial());
        drop(trial);

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().trials_in_flight, 0);
        assert!(cb.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_closed_permit_is_not_a_failure() {
        let cb = breaker(1, 1, 5);
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_trials_are_written_off_after_cooldown() {
        let cb = breaker(1, 1, 5);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(5)).await;

        let stuck = cb.try_acquire().expect("trial admitted");
        assert!(cb.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Reports from the written-off trial no longer count.
        drop(stuck);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_trial_releases_its_slot() {
        let cb = Arc::new(breaker(1, 1, 5));
        let hang: BoxHandler = Arc::new(
            |_req: Request, cx: RequestContext, _w: ResponseWriter| async move {
                cx.trip_breaker();
                std::future::pending::<()>().await;
            },
        );
        let guarded = Breaker::new(hang, Arc::clone(&cb));
        fail(&cb);
        tokio::time::advance(Duration::from_secs(5)).await;

        let call = guarded.call(
            Request::default(),
            RequestContext::new("gone", Vec::new()),
            ResponseWriter::new(),
        );
        tokio::select! {
            _ = call => unreachable!("handler never completes"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_middleware_rejects_without_invoking_handler() {
        let cb = Arc::new(breaker(1, 1, 60));
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handler: BoxHandler = Arc::new(
            move |_req: Request, cx: RequestContext, w: ResponseWriter| {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    cx.trip_breaker();
                    let _ = w.write_header(StatusCode::BAD_GATEWAY);
                }
            },
        );
        let guarded = Breaker::new(handler, Arc::clone(&cb));

        let writer = ResponseWriter::new();
        guarded
            .call(Request::default(), RequestContext::new("a", Vec::new()), writer.clone())
            .await;
        assert_eq!(writer.record().status, StatusCode::BAD_GATEWAY);
        assert_eq!(cb.state(), CircuitState::Open);

        let writer = ResponseWriter::new();
        let cx = RequestContext::new("b", Vec::new());
        guarded.call(Request::default(), cx.clone(), writer.clone()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cx.outcome(), Outcome::Rejected);
        assert_eq!(writer.record().status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(writer.body_snapshot(), BREAKER_OPEN_BODY.as_bytes());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_not_lost() {
        let cb = Arc::new(breaker(1_000, 1, 60));
        let mut tasks = Vec::new();
        for _ in 0..200 {
            let cb = Arc::clone(&cb);
            tasks.push(tokio::spawn(async move {
                let permit = cb.try_acquire().unwrap();
                tokio::task::yield_now().await;
                cb.record(permit, true);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(cb.snapshot().consecutive_failures, 200);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
