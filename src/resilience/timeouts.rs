//! Timeout enforcement.
//!
//! # Responsibilities
//! - Run a handler under a per-request deadline
//! - Race handler completion against deadline expiry
//! - Write the timeout response when the deadline wins
//!
//! # Design Decisions
//! - A zero duration disables the race entirely; the handler runs inline
//! - The handler runs on its own task and is never aborted; on timeout its
//!   cancellation token fires and it is expected to stop promptly
//! - The handler's buffered output is committed only when it completes in
//!   time; on expiry the enforcer claims the response and replaces it
//! - Timeouts are not errors: the outcome is a 408 for instrumentation

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::errors::{AppError, ErrorCode};
use crate::http::recorder::ResponseWriter;
use crate::routing::context::{Outcome, RequestContext};
use crate::routing::handler::{BoxHandler, Handler};

/// Middleware enforcing a deadline on the wrapped handler.
pub struct Timeout {
    inner: BoxHandler,
    duration: Duration,
}

impl Timeout {
    pub fn new(inner: BoxHandler, duration: Duration) -> Self {
        Self { inner, duration }
    }
}

impl Handler for Timeout {
    fn call(
        &self,
        request: Request,
        cx: RequestContext,
        writer: ResponseWriter,
    ) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        let duration = self.duration;

        Box::pin(async move {
            if duration.is_zero() {
                inner.call(request, cx, writer).await;
                return;
            }

            let started = Instant::now();
            let scoped = cx.with_deadline(started + duration);
            let deadline = scoped.deadline().unwrap_or(started + duration);
            let mut task = tokio::spawn(inner.call(request, scoped.clone(), writer.clone()));

            tokio::select! {
                joined = &mut task => {
                    match joined {
                        Ok(()) => {
                            if let Err(e) = writer.commit() {
                                tracing::warn!(request_id = %cx.request_id(), error = %e, "Handler response not committed");
                            }
                        }
                        Err(e) => {
                            tracing::error!(request_id = %cx.request_id(), error = %e, "Handler task failed");
                            cx.set_outcome(Outcome::Panicked);
                            if let Err(e) = AppError::new(ErrorCode::Other).write_to(&writer.enforcer()) {
                                tracing::warn!(request_id = %cx.request_id(), error = %e, "Failed to write error response");
                            }
                        }
                    }
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {}
                _ = cx.cancelled() => {}
            }

            // The handler task keeps running detached; it only gets the signal.
            scoped.cancel();
            cx.set_outcome(Outcome::TimedOut);

            tracing::warn!(
                request_id = %cx.request_id(),
                timeout_ms = duration.as_millis() as u64,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request timed out"
            );

            if let Err(e) = AppError::new(ErrorCode::RequestTimeout).write_to(&writer.enforcer()) {
                tracing::warn!(
                    request_id = %cx.request_id(),
                    error = %e,
                    "Failed to write timeout response"
                );
            }
        })
    }
}
