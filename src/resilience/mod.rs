//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to a guarded route:
//!     → timeouts.rs (race the handler against its deadline)
//!     → circuit_breaker.rs (fail fast while routes are unhealthy)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Timeouts are reported as 408 responses, never as errors
//! - Circuit breaker failures are marked explicitly by handlers
//! - All resilience logic is composable middleware

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{Breaker, BreakerSnapshot, CircuitBreaker, CircuitState, Permit};
pub use timeouts::Timeout;
