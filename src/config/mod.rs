//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! env file (JSON, optional)
//!     → env.rs (export string values into the environment)
//!
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → env.rs (ROUTE_GUARD_* overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → RouterOptions for the route registrar
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{AppConfig, BreakerConfig, ListenerConfig, LogFormat, ObservabilityConfig, RouterConfig};
