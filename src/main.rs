//! route-guard demo service.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────────┐
//!                 │                    ROUTE GUARD                        │
//!                 │                                                       │
//!  Client Request │  ┌────────┐   ┌────────────┐   ┌─────────┐            │
//!  ───────────────┼─▶│  axum  │──▶│ instrument │──▶│ timeout │──┐         │
//!                 │  │ router │   └─────┬──────┘   └─────────┘  │         │
//!                 │  └────────┘         │                       ▼         │
//!                 │                     │               ┌─────────────┐   │
//!                 │                     │               │   breaker   │   │
//!                 │                     │               └──────┬──────┘   │
//!                 │                     ▼                      ▼          │
//!  Client Response│  ┌────────────────────────┐        ┌─────────────┐    │
//!  ◀──────────────┼──│ recorder (first writer │◀───────│   handler   │    │
//!                 │  │  wins, status + bytes) │        └─────────────┘    │
//!                 │  └────────────────────────┘                           │
//!                 │                                                       │
//!                 │  config · logging · metrics exporter · lifecycle      │
//!                 └───────────────────────────────────────────────────────┘
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use clap::Parser;
use serde::Deserialize;
use tokio::net::TcpListener;

use route_guard::config::env::{apply_env_file, apply_env_overrides};
use route_guard::config::validation::validate_config;
use route_guard::config::{load_config, AppConfig, ConfigError};
use route_guard::lifecycle::signals::shutdown_on_signal;
use route_guard::observability::logging::init_logging;
use route_guard::observability::metrics::{init_metrics, MetricsSink, NoopSink, PrometheusSink};
use route_guard::{AppError, ErrorCode, GuardedRouter, HttpServer, RequestContext, ResponseWriter, Shutdown};

#[derive(Parser)]
#[command(name = "route-guard")]
#[command(about = "HTTP service with deadlines, circuit breaking and latency metrics", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file of environment variables to export before startup.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Exported before the runtime spawns its worker threads.
    let env_vars = cli.env_file.as_deref().map(apply_env_file).transpose()?;

    let mut config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability)?;
    tracing::info!("route-guard v0.1.0 starting");
    if let Some(count) = env_vars {
        tracing::info!(count, "Environment file applied");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: AppConfig) -> Result<(), Box<dyn Error>> {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_ms = config.router.request_timeout_ms,
        breaker_enabled = config.breaker.enabled,
        "Configuration loaded"
    );

    let sink: Arc<dyn MetricsSink> = if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to register metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
        Arc::new(PrometheusSink::new(&config.observability.namespace))
    } else {
        Arc::new(NoopSink)
    };

    let mut routes = GuardedRouter::new(config.router_options(), sink);
    routes
        .get("/ping", ping)?
        .get("/slow/{ms}", slow)?
        .post("/jobs", create_job)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(shutdown_on_signal(shutdown));

    HttpServer::new(config, routes)
        .run(listener, server_shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn ping(_req: Request, _cx: RequestContext, w: ResponseWriter) {
    let _ = w.write_text(StatusCode::OK, "pong");
}

/// Sleeps for `{ms}` milliseconds unless the request is cancelled first.
async fn slow(_req: Request, cx: RequestContext, w: ResponseWriter) {
    let Some(ms) = cx.url_param("ms").and_then(|v| v.parse::<u64>().ok()) else {
        let _ = w.write_text(StatusCode::BAD_REQUEST, "invalid duration");
        return;
    };

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => {
            let _ = w.write_text(StatusCode::OK, "done");
        }
        _ = cx.cancelled() => {
            tracing::debug!(request_id = %cx.request_id(), "Slow handler cancelled");
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobRequest {
    name: String,
    #[serde(default)]
    fail: bool,
}

/// Accepts a job; `"fail": true` simulates a dependency outage.
async fn create_job(req: Request, cx: RequestContext, w: ResponseWriter) {
    let job = match axum::body::to_bytes(req.into_body(), 64 * 1024)
        .await
        .ok()
        .and_then(|body| serde_json::from_slice::<JobRequest>(&body).ok())
    {
        Some(job) => job,
        None => {
            let _ = w.write_text(StatusCode::BAD_REQUEST, "invalid job");
            return;
        }
    };

    if job.fail {
        cx.trip_breaker();
        let err = AppError::new(ErrorCode::ServiceNotAvailable).with_field("job", job.name);
        if let Err(e) = err.write_to(&w) {
            tracing::warn!(request_id = %cx.request_id(), error = %e, "Failed to write error");
        }
        return;
    }

    let body = serde_json::json!({ "id": uuid::Uuid::new_v4(), "name": job.name });
    if let Err(e) = w.write_json(StatusCode::CREATED, &body) {
        tracing::warn!(request_id = %cx.request_id(), error = %e, "Failed to write job");
    }
}
