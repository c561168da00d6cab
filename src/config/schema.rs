//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::router::{BreakerSettings, RouterOptions};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Deadline and instrumentation applied to every route.
    pub router: RouterConfig,

    /// Circuit breaker shared by all routes.
    pub breaker: BreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Router options derived from this configuration.
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            timeout: Duration::from_millis(self.router.request_timeout_ms),
            instrument: self.router.instrument,
            breaker: self.breaker.settings(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Per-route pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Request deadline in milliseconds. 0 disables the deadline.
    pub request_timeout_ms: u64,

    /// Record a latency observation for every request.
    pub instrument: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            instrument: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Guard routes with the breaker.
    pub enabled: bool,

    /// Consecutive marked failures before opening.
    pub failure_threshold: u32,

    /// Consecutive trial successes before closing again.
    pub success_threshold: u32,

    /// Time spent open before admitting trial requests, in seconds.
    pub cooldown_secs: u64,
}

impl BreakerConfig {
    pub fn settings(&self) -> Option<BreakerSettings> {
        self.enabled.then(|| BreakerSettings {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        })
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 10,
            success_threshold: 2,
            cooldown_secs: 15,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Fmt,
    /// One JSON object per event.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Prefix for metric names.
    pub namespace: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Fmt,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            namespace: "route_guard".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [router]
            request_timeout_ms = 1000

            [breaker]
            failure_threshold = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.breaker.success_threshold, 2);
        assert_eq!(config.observability.log_format, LogFormat::Fmt);

        let options = config.router_options();
        assert_eq!(options.timeout, Duration::from_millis(1000));
        assert_eq!(
            options.breaker,
            Some(BreakerSettings {
                failure_threshold: 3,
                success_threshold: 2,
                cooldown: Duration::from_secs(15),
            })
        );
    }

    #[test]
    fn test_disabled_breaker_has_no_settings() {
        let config: AppConfig = toml::from_str(
            r#"
            [breaker]
            enabled = false

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert!(config.router_options().breaker.is_none());
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
