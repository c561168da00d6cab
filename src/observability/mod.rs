//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request:
//!     → http::middleware::instrument (one Observation)
//!     → metrics.rs (MetricsSink → histogram)
//!
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request ID flows through every log event of a request
//! - Metrics setup failures are logged, never fatal

pub mod logging;
pub mod metrics;
