//! StatusView and ActiveUpstreamTracker: a pure JSON snapshot builder over
//! the ProxyRegistry, plus transition logging for the "currently active"
//! upstream.

use std::sync::Mutex;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use tracing::info;

use crate::engine::full_body;
use crate::instance::FailoverInstance;
use crate::registry::ProxyRegistry;
use crate::upstream::Upstream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStatus {
    Up,
    Unhealthy,
    Down,
}

impl UpstreamStatus {
    fn as_str(self) -> &'static str {
        match self {
            UpstreamStatus::Up => "UP",
            UpstreamStatus::Unhealthy => "UNHEALTHY",
            UpstreamStatus::Down => "DOWN",
        }
    }
}

impl Serialize for UpstreamStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
pub struct UpstreamStatusEntry {
    pub host: String,
    pub status: UpstreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    pub health_check_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

/// Render a wall-clock instant as an RFC3339 timestamp.
fn format_timestamp(t: std::time::SystemTime) -> String {
    humantime::format_rfc3339_seconds(t).to_string()
}

#[derive(Debug, Serialize)]
pub struct PathStatus {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    pub failover_proxies: Vec<UpstreamStatusEntry>,
}

/// Derive per-upstream status + the instance's `active` upstream. This is a
/// pure function of the instance's current state (no locks are held across
/// the call; each accessor takes and releases its own).
fn derive_status(instance: &FailoverInstance) -> PathStatus {
    let fail_duration = instance.fail_duration();
    let mut entries = Vec::with_capacity(instance.upstreams().len());
    let mut active: Option<String> = None;

    for upstream in instance.upstreams() {
        let has_health_check = instance.has_health_check(upstream);
        let health = instance.health_state.get(upstream);
        let healthy = health.and_then(|h| h.healthy);
        let failed = instance.failure_cache.is_failed(upstream, fail_duration);

        let status = if healthy == Some(false) {
            UpstreamStatus::Unhealthy
        } else if !has_health_check && failed {
            UpstreamStatus::Down
        } else if healthy == Some(true) || (!has_health_check && !failed) {
            UpstreamStatus::Up
        } else {
            // Health check configured but no probe has completed yet.
            UpstreamStatus::Down
        };

        if active.is_none() && status != UpstreamStatus::Unhealthy && !failed {
            active = Some(upstream.to_string());
        }

        entries.push(UpstreamStatusEntry {
            host: upstream.to_string(),
            status,
            last_check: health
                .and_then(|h| h.last_check_wall)
                .map(format_timestamp),
            last_failure: instance
                .failure_cache
                .last_failure(upstream)
                .map(format_timestamp),
            health_check_enabled: has_health_check,
            response_time_ms: health.and_then(|h| h.last_latency_ms),
        });
    }

    PathStatus {
        path: instance.display_path().to_string(),
        active,
        failover_proxies: entries,
    }
}

/// Pure function producing the JSON status document from a registry
/// snapshot.
pub struct StatusView;

impl StatusView {
    pub fn snapshot(registry: &ProxyRegistry) -> Vec<PathStatus> {
        registry.snapshot().iter().map(|i| derive_status(i)).collect()
    }
}

/// The status endpoint handler: `GET` returns `200` with a JSON array
/// (never `null`/omitted) of [`PathStatus`]; anything else returns
/// `405 Method Not Allowed`.
pub async fn handle_status(
    req: Request<Incoming>,
    registry: &ProxyRegistry,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    if req.method() != Method::GET {
        return Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(full_body("method not allowed"))
            .expect("building a static response cannot fail"));
    }

    let snapshot = StatusView::snapshot(registry);
    let body = serde_json::to_vec(&snapshot).unwrap_or_else(|_| b"[]".to_vec());
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(full_body(body))
        .expect("building a static response cannot fail"))
}

/// Coarse reason for an active-upstream transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    PreviousUnhealthy,
    PreviousInFailureState,
    HigherPriorityRecovered,
    Unknown,
}

impl TransitionReason {
    fn as_str(self) -> &'static str {
        match self {
            TransitionReason::PreviousUnhealthy => "previous upstream unhealthy",
            TransitionReason::PreviousInFailureState => "previous upstream in failure state",
            TransitionReason::HigherPriorityRecovered => "higher priority upstream recovered",
            TransitionReason::Unknown => "unknown",
        }
    }
}

/// Observes the derived "active" upstream across calls from both the
/// engine and the health checker paths, logging a structured event on
/// change.
pub struct ActiveUpstreamTracker {
    last_active: Mutex<Option<Upstream>>,
}

impl ActiveUpstreamTracker {
    pub fn new() -> Self {
        Self {
            last_active: Mutex::new(None),
        }
    }

    /// Recompute the active upstream for `instance` and log a transition if
    /// it changed since the last call.
    pub fn observe(&self, instance: &FailoverInstance) {
        let fail_duration = instance.fail_duration();
        let new_active = instance.upstreams().iter().find(|u| {
            let unhealthy = instance.health_state.is_known_unhealthy(u);
            let failed = instance.failure_cache.is_failed(u, fail_duration);
            !unhealthy && !failed
        });

        let mut last = self.last_active.lock().expect("active tracker lock poisoned");
        if last.as_ref() == new_active {
            return;
        }

        let reason = last
            .as_ref()
            .map(|previous| classify_transition(instance, previous, new_active))
            .unwrap_or(TransitionReason::Unknown);

        info!(
            path = instance.registration_path(),
            previous = last.as_ref().map(|u| u.to_string()),
            new = new_active.map(|u| u.to_string()),
            reason = reason.as_str(),
            "active upstream changed"
        );

        *last = new_active.cloned();
    }
}

impl Default for ActiveUpstreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_transition(
    instance: &FailoverInstance,
    previous: &Upstream,
    new_active: Option<&Upstream>,
) -> TransitionReason {
    let fail_duration = instance.fail_duration();
    if instance.health_state.is_known_unhealthy(previous) {
        return TransitionReason::PreviousUnhealthy;
    }
    if instance.failure_cache.is_failed(previous, fail_duration) {
        return TransitionReason::PreviousInFailureState;
    }
    if let Some(new_active) = new_active {
        let previous_idx = instance.upstreams().iter().position(|u| u == previous);
        let new_idx = instance.upstreams().iter().position(|u| u == new_active);
        if let (Some(p), Some(n)) = (previous_idx, new_idx) {
            if n < p {
                return TransitionReason::HigherPriorityRecovered;
            }
        }
    }
    TransitionReason::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::replacer::NoopReplacer;

    fn instance(toml: &str) -> FailoverInstance {
        let cfg: RouteConfig = toml::from_str(toml).unwrap();
        FailoverInstance::provision(cfg, &NoopReplacer, Some("/api".to_string())).unwrap()
    }

    #[test]
    fn all_up_no_health_check() {
        let i = instance(
            r#"
            [[upstreams]]
            url = "http://a"
            "#,
        );
        let status = derive_status(&i);
        assert_eq!(status.failover_proxies[0].status, UpstreamStatus::Up);
        assert_eq!(status.active.as_deref(), Some("http://a"));
    }

    #[test]
    fn failed_upstream_without_health_check_is_down() {
        let i = instance(
            r#"
            [[upstreams]]
            url = "http://a"
            "#,
        );
        i.failure_cache.mark(&i.upstreams()[0]);
        let status = derive_status(&i);
        assert_eq!(status.failover_proxies[0].status, UpstreamStatus::Down);
        assert!(status.active.is_none());
    }

    #[test]
    fn scenario_status_snapshot_shape() {
        let i = instance(
            r#"
            [[upstreams]]
            url = "http://primary"
            [upstreams.health_check]

            [[upstreams]]
            url = "http://secondary"
            "#,
        );
        i.health_state.record(&i.upstreams()[0], false, None);

        let status = derive_status(&i);
        assert_eq!(status.path, "/api");
        assert_eq!(status.failover_proxies.len(), 2);
        assert_eq!(status.failover_proxies[0].status, UpstreamStatus::Unhealthy);
        assert_eq!(status.failover_proxies[1].status, UpstreamStatus::Up);
        assert!(!status.failover_proxies[1].health_check_enabled);
        assert_eq!(status.active.as_deref(), Some("http://secondary"));
    }

    #[test]
    fn snapshot_over_empty_registry_is_empty_vec() {
        let registry = ProxyRegistry::new();
        let snapshot = StatusView::snapshot(&registry);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn tracker_logs_nothing_on_first_observe_with_no_change_baseline() {
        let i = instance(
            r#"
            [[upstreams]]
            url = "http://a"
            "#,
        );
        // Does not panic; exercises the first-observe path.
        i.active_tracker.observe(&i);
        i.active_tracker.observe(&i);
    }

    /// The status body is always a JSON array, and no path carries the
    /// `auto:` prefix. `handle_status` itself is exercised end to end in
    /// `tests/failover_integration.rs`, since `hyper::body::Incoming` has
    /// no public constructor for a request built entirely in a unit test.
    #[test]
    fn status_snapshot_is_json_array_without_auto_prefix() {
        let registry = ProxyRegistry::new();
        registry.register(
            "/api",
            std::sync::Arc::new(instance(
                r#"
                [[upstreams]]
                url = "http://a"
                "#,
            )),
        );

        let snapshot = StatusView::snapshot(&registry);
        let body = serde_json::to_vec(&snapshot).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed.is_array());
        for entry in parsed.as_array().unwrap() {
            let path = entry["path"].as_str().unwrap();
            assert!(!path.starts_with("auto:"));
        }
    }
}
