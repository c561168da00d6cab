//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Turn the registered routes into an Axum Router
//! - Wire up middleware (tracing, request ID)
//! - Bind server to listener
//! - Drain in-flight requests on shutdown

use axum::http::HeaderName;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::lifecycle::shutdown;
use crate::routing::router::{GuardedRouter, X_REQUEST_ID};

/// HTTP server serving a [`GuardedRouter`].
pub struct HttpServer {
    router: Router,
    config: AppConfig,
}

impl HttpServer {
    pub fn new(config: AppConfig, routes: GuardedRouter) -> Self {
        tracing::info!(
            routes = routes.routes().len(),
            timeout_ms = routes.options().timeout.as_millis() as u64,
            breaker = routes.breaker().is_some(),
            "Building HTTP router"
        );
        Self {
            router: Self::build_router(routes),
            config,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(routes: GuardedRouter) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        routes
            .into_router()
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The fully layered router, for embedding or testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
