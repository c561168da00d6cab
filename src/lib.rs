//! Request-handling pipeline with deadlines, circuit breaking and latency
//! instrumentation around business handlers.

pub mod config;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::AppConfig;
pub use errors::{AppError, ErrorCode};
pub use http::{HttpServer, ResponseWriter};
pub use lifecycle::Shutdown;
pub use routing::{GuardedRouter, RequestContext, RouterOptions};
