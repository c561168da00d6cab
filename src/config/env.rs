//! Environment loading.
//!
//! # Responsibilities
//! - Read a flat JSON file of string values and export it as env vars
//! - Apply `ROUTE_GUARD_*` overrides on top of the file configuration
//!
//! # Design Decisions
//! - Only string values are accepted; anything else rejects the whole file
//! - The env file is applied before the runtime starts worker threads

use std::path::Path;

use crate::config::loader::ConfigError;
use crate::config::schema::AppConfig;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ROUTE_GUARD_";

/// Parse an env file into key/value pairs.
pub fn load_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_env_json(&content)
}

fn parse_env_json(content: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let values: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;

    values
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            other => Err(ConfigError::NonStringEnv { key, value: other }),
        })
        .collect()
}

/// Export every entry of an env file into the process environment.
pub fn apply_env_file(path: &Path) -> Result<usize, ConfigError> {
    let vars = load_env_file(path)?;
    for (key, value) in &vars {
        std::env::set_var(key, value);
    }
    Ok(vars.len())
}

/// Apply `ROUTE_GUARD_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut AppConfig) -> Result<(), ConfigError> {
    apply_overrides(config, |name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
}

fn apply_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    if let Some(v) = lookup("REQUEST_TIMEOUT_MS") {
        config.router.request_timeout_ms = parse_number("REQUEST_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("LOG_LEVEL") {
        config.observability.log_level = v;
    }
    if let Some(v) = lookup("METRICS_ADDRESS") {
        config.observability.metrics_address = v;
    }
    if let Some(v) = lookup("BREAKER_ENABLED") {
        config.breaker.enabled = v.eq_ignore_ascii_case("true") || v == "1";
    }
    Ok(())
}

fn parse_number(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidOverride {
        key: format!("{ENV_PREFIX}{name}"),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parses_string_values() {
        let vars = parse_env_json(r#"{"DB_HOST": "localhost", "DB_PORT": "5432"}"#).unwrap();
        assert_eq!(vars.len(), 2);
        assert!(vars.contains(&("DB_PORT".to_string(), "5432".to_string())));
    }

    #[test]
    fn test_rejects_non_string_values() {
        let err = parse_env_json(r#"{"DB_PORT": 5432}"#).unwrap_err();
        assert!(matches!(err, ConfigError::NonStringEnv { ref key, .. } if key == "DB_PORT"));
    }

    #[test]
    fn test_apply_env_file_exports_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ROUTE_GUARD_TEST_ENV_FILE": "loaded"}}"#).unwrap();

        assert_eq!(apply_env_file(file.path()).unwrap(), 1);
        assert_eq!(
            std::env::var("ROUTE_GUARD_TEST_ENV_FILE").as_deref(),
            Ok("loaded")
        );
    }

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let env: HashMap<&str, &str> = [
            ("BIND_ADDRESS", "127.0.0.1:3000"),
            ("REQUEST_TIMEOUT_MS", "1500"),
            ("BREAKER_ENABLED", "false"),
        ]
        .into();

        let mut config = AppConfig::default();
        apply_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:3000");
        assert_eq!(config.router.request_timeout_ms, 1500);
        assert!(!config.breaker.enabled);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_bad_numeric_override_is_an_error() {
        let mut config = AppConfig::default();
        let err = apply_overrides(&mut config, |k| {
            (k == "REQUEST_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }
}
