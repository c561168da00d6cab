//! Latency and status instrumentation.
//!
//! Times the full decorated call and emits exactly one observation per
//! request, whichever layer below produced the response. The observation
//! is emitted when the call finishes or when it is dropped early because
//! the client went away.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::Method;
use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::http::recorder::ResponseWriter;
use crate::observability::metrics::{MetricsSink, Observation};
use crate::routing::context::RequestContext;
use crate::routing::handler::{BoxHandler, Handler};

/// Middleware reporting one [`Observation`] per request.
pub struct Instrument {
    inner: BoxHandler,
    pattern: Arc<str>,
    sink: Arc<dyn MetricsSink>,
}

impl Instrument {
    pub fn new(inner: BoxHandler, pattern: impl Into<Arc<str>>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner,
            pattern: pattern.into(),
            sink,
        }
    }
}

impl Handler for Instrument {
    fn call(
        &self,
        request: Request,
        cx: RequestContext,
        writer: ResponseWriter,
    ) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        let mut pending = PendingObservation {
            pattern: Arc::clone(&self.pattern),
            method: request.method().clone(),
            sink: Arc::clone(&self.sink),
            cx: cx.clone(),
            writer: writer.clone(),
            start: Instant::now(),
            finished: false,
        };

        Box::pin(async move {
            inner.call(request, cx, writer).await;
            pending.finished = true;
            drop(pending);
        })
    }
}

/// Emits the request's observation when dropped.
struct PendingObservation {
    pattern: Arc<str>,
    method: Method,
    sink: Arc<dyn MetricsSink>,
    cx: RequestContext,
    writer: ResponseWriter,
    start: Instant,
    finished: bool,
}

impl Drop for PendingObservation {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let record = self.writer.record();

        if self.finished {
            tracing::debug!(
                request_id = %self.cx.request_id(),
                pattern = %self.pattern,
                method = %self.method,
                status = record.status.as_u16(),
                bytes = record.bytes_written,
                latency_ms,
                outcome = self.cx.outcome().as_str(),
                "Request finished"
            );
        } else {
            tracing::debug!(
                request_id = %self.cx.request_id(),
                pattern = %self.pattern,
                method = %self.method,
                latency_ms,
                "Request abandoned before completion"
            );
        }

        self.sink.observe(&Observation {
            pattern: Arc::clone(&self.pattern),
            method: self.method.clone(),
            status: record.status,
            latency_ms,
        });
    }
}
