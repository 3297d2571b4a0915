//! Declarative description of a route's failover setup, standing in for
//! what the host framework's directive parser would hand us after parsing
//! a Caddyfile block.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::FailoverError;

fn default_fail_duration_secs() -> f64 {
    30.0
}

fn default_dial_timeout_secs() -> f64 {
    2.0
}

fn default_response_timeout_secs() -> f64 {
    5.0
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_expected_status() -> u16 {
    200
}

/// A single upstream's configuration: URL, header overrides, health check,
/// TLS verification policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub health_check: Option<HealthCheckConfig>,
}

/// Health check wire shape, with sensible defaults for an unspecified
/// `[upstreams.health_check]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            expected_status: default_expected_status(),
        }
    }
}

/// A route's full failover configuration, minus the runtime-only fields
/// `registration_path`/`display_path`, which the demo harness derives
/// separately since the host framework would normally supply them from
/// matcher metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default = "default_fail_duration_secs")]
    pub fail_duration_secs: f64,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: f64,
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: f64,
    pub status_path: Option<String>,
}

impl RouteConfig {
    /// Load and parse a TOML config file: read, parse, wrap both failure
    /// modes in a typed error carrying the path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FailoverError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| FailoverError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| FailoverError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let toml = r#"
            [[upstreams]]
            url = "http://127.0.0.1:9001"
        "#;
        let cfg: RouteConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.upstreams.len(), 1);
        assert_eq!(cfg.fail_duration_secs, 30.0);
        assert_eq!(cfg.dial_timeout_secs, 2.0);
        assert_eq!(cfg.response_timeout_secs, 5.0);
        assert!(cfg.status_path.is_none());
        assert!(!cfg.upstreams[0].insecure_skip_verify);
        assert!(cfg.upstreams[0].health_check.is_none());
    }

    #[test]
    fn parses_health_check_defaults() {
        let toml = r#"
            [[upstreams]]
            url = "http://127.0.0.1:9001"
            [upstreams.health_check]
        "#;
        let cfg: RouteConfig = toml::from_str(toml).unwrap();
        let hc = cfg.upstreams[0].health_check.as_ref().unwrap();
        assert_eq!(hc.path, "/health");
        assert_eq!(hc.interval_secs, 30);
        assert_eq!(hc.timeout_secs, 5);
        assert_eq!(hc.expected_status, 200);
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let toml = r#"
            [[upstreams]]
            url = "http://127.0.0.1:9001"
            bogus = true
        "#;
        assert!(toml::from_str::<RouteConfig>(toml).is_err());
    }

    #[test]
    fn parses_header_overrides_and_custom_timeouts() {
        let toml = r#"
            fail_duration_secs = 0.2
            status_path = "/api/*"

            [[upstreams]]
            url = "http://u"
            insecure_skip_verify = true
            [upstreams.headers]
            X-Src = "local"
        "#;
        let cfg: RouteConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.fail_duration_secs, 0.2);
        assert_eq!(cfg.status_path.as_deref(), Some("/api/*"));
        assert!(cfg.upstreams[0].insecure_skip_verify);
        assert_eq!(
            cfg.upstreams[0].headers.get("X-Src").map(String::as_str),
            Some("local")
        );
    }
}
