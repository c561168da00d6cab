//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing)
//!     → [route registrar chain] (routing)
//!     → middleware/instrument.rs (latency + status)
//!     → recorder.rs (buffered response, first writer wins)
//!     → Send to client
//! ```

pub mod middleware;
pub mod recorder;
pub mod server;

pub use recorder::{ResponseRecord, ResponseWriter, WriteError, WriterOrigin};
pub use server::HttpServer;
