//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Registration (at startup):
//!     register(method, pattern, handler)
//!     → router.rs (compose instrument → timeout → breaker → handler)
//!     → RouteRegistration (immutable)
//!     → into_router() hands chains to the axum path router
//!
//! Incoming Request:
//!     axum matches method + pattern
//!     → router.rs dispatch (context.rs + ResponseWriter)
//!     → composed chain (handler.rs)
//!     → ResponseWriter::finish → response
//! ```
//!
//! # Design Decisions
//! - Routes composed at startup, immutable at runtime
//! - Pattern matching is delegated; patterns are only validated here
//! - Deterministic: the same route always runs the same chain

pub mod context;
pub mod handler;
pub mod router;

pub use context::{Outcome, RequestContext};
pub use handler::{BoxHandler, Handler};
pub use router::{BreakerSettings, GuardedRouter, RouteRegistration, RouterError, RouterOptions};
