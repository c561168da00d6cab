//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain in-flight requests → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup lives in main: config, logging, metrics, routes, listener
//! - Detached handler tasks are not awaited on shutdown

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
