//! Route registration and dispatch.
//!
//! # Responsibilities
//! - Compose the middleware chain for each registered route
//! - Hand composed chains to the path router, keyed by method and pattern
//! - Turn each matched request into a context, a writer and a response
//!
//! # Design Decisions
//! - Chains are built once at registration and never mutated
//! - Fixed order: instrument → timeout → breaker (optional) → handler
//! - One breaker per router, shared by every route registered through it
//! - Pattern matching itself is axum's job; we only validate the pattern

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequestParts, RawPathParams, Request};
use axum::http::Method;
use axum::response::Response;
use axum::routing::{on, MethodFilter};
use axum::Router;
use uuid::Uuid;

use crate::http::middleware::instrument::Instrument;
use crate::http::recorder::ResponseWriter;
use crate::observability::metrics::MetricsSink;
use crate::resilience::circuit_breaker::{Breaker, CircuitBreaker};
use crate::resilience::timeouts::Timeout;
use crate::routing::context::RequestContext;
use crate::routing::handler::{BoxHandler, Handler};

/// Header carrying the request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Breaker thresholds and cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 2,
            cooldown: Duration::from_secs(15),
        }
    }
}

/// Options applied to every route of a [`GuardedRouter`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Per-request deadline. Zero disables it.
    pub timeout: Duration,
    /// Emit one latency observation per request.
    pub instrument: bool,
    /// Guard routes with a shared circuit breaker.
    pub breaker: Option<BreakerSettings>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            instrument: true,
            breaker: Some(BreakerSettings::default()),
        }
    }
}

/// Errors raised while registering routes.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("unsupported method {0}")]
    UnsupportedMethod(Method),

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("route {method} {pattern} is already registered")]
    DuplicateRoute { method: Method, pattern: String },
}

/// A registered route and its composed chain.
pub struct RouteRegistration {
    method: Method,
    filter: MethodFilter,
    pattern: String,
    chain: BoxHandler,
}

impl RouteRegistration {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl std::fmt::Debug for RouteRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRegistration")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Registers handlers behind the timeout, breaker and instrumentation chain.
pub struct GuardedRouter {
    options: RouterOptions,
    sink: Arc<dyn MetricsSink>,
    breaker: Option<Arc<CircuitBreaker>>,
    routes: Vec<RouteRegistration>,
}

impl std::fmt::Debug for GuardedRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedRouter")
            .field("options", &self.options)
            .field("breaker", &self.breaker)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl GuardedRouter {
    pub fn new(options: RouterOptions, sink: Arc<dyn MetricsSink>) -> Self {
        let breaker = options.breaker.map(|s| {
            Arc::new(CircuitBreaker::new(
                s.failure_threshold,
                s.success_threshold,
                s.cooldown,
            ))
        });
        Self {
            options,
            sink,
            breaker,
            routes: Vec::new(),
        }
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// The breaker shared by all routes, if enabled.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn routes(&self) -> &[RouteRegistration] {
        &self.routes
    }

    /// Register `handler` for `method` requests matching `pattern`.
    pub fn register<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, RouterError> {
        let filter =
            method_filter(&method).ok_or_else(|| RouterError::UnsupportedMethod(method.clone()))?;
        validate_pattern(pattern)?;

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern == pattern)
        {
            return Err(RouterError::DuplicateRoute {
                method,
                pattern: pattern.to_string(),
            });
        }

        let chain = self.compose(pattern, Arc::new(handler));
        tracing::debug!(method = %method, pattern, "Route registered");

        self.routes.push(RouteRegistration {
            method,
            filter,
            pattern: pattern.to_string(),
            chain,
        });
        Ok(self)
    }

    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouterError> {
        self.register(Method::GET, pattern, handler)
    }

    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouterError> {
        self.register(Method::POST, pattern, handler)
    }

    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouterError> {
        self.register(Method::PUT, pattern, handler)
    }

    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouterError> {
        self.register(Method::DELETE, pattern, handler)
    }

    pub fn patch<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouterError> {
        self.register(Method::PATCH, pattern, handler)
    }

    fn compose(&self, pattern: &str, handler: BoxHandler) -> BoxHandler {
        let mut chain = handler;
        if let Some(breaker) = &self.breaker {
            chain = Arc::new(Breaker::new(chain, Arc::clone(breaker)));
        }
        chain = Arc::new(Timeout::new(chain, self.options.timeout));
        if self.options.instrument {
            chain = Arc::new(Instrument::new(chain, pattern, Arc::clone(&self.sink)));
        }
        chain
    }

    /// Hand every registered chain to the axum path router.
    pub fn into_router(self) -> Router {
        self.routes.into_iter().fold(Router::new(), |router, route| {
            let chain = route.chain;
            router.route(
                &route.pattern,
                on(route.filter, move |request: Request| {
                    dispatch(Arc::clone(&chain), request)
                }),
            )
        })
    }
}

fn method_filter(method: &Method) -> Option<MethodFilter> {
    let filter = match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::DELETE => MethodFilter::DELETE,
        Method::PATCH => MethodFilter::PATCH,
        Method::HEAD => MethodFilter::HEAD,
        Method::OPTIONS => MethodFilter::OPTIONS,
        Method::TRACE => MethodFilter::TRACE,
        _ => return None,
    };
    Some(filter)
}

fn validate_pattern(pattern: &str) -> Result<(), RouterError> {
    let invalid = |reason| {
        Err(RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })
    };

    if !pattern.starts_with('/') {
        return invalid("must start with '/'");
    }
    if pattern
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return invalid("captures use the {name} or {*name} syntax");
    }
    Ok(())
}

/// Run one matched request through its chain.
async fn dispatch(chain: BoxHandler, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();

    let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(raw) => raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let cx = RequestContext::new(request_id, params);
    // Dropped when the response is produced or the client goes away.
    let _cancel_on_drop = cx.cancellation_token().clone().drop_guard();

    let writer = ResponseWriter::new();
    chain
        .call(Request::from_parts(parts, body), cx, writer.clone())
        .await;
    writer.finish()
}
