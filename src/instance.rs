//! FailoverInstance: a configured route, tying FailureCache, HealthState,
//! HttpClientPool and the spawned HealthChecker tasks together under one
//! `provision → serve → cleanup` lifecycle.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::client_pool::HttpClientPool;
use crate::config::RouteConfig;
use crate::error::FailoverError;
use crate::failure_cache::FailureCache;
use crate::health_checker::{build_health_check_client, HealthChecker, HealthSpec};
use crate::health_state::HealthState;
use crate::replacer::VariableReplacer;
use crate::status::ActiveUpstreamTracker;
use crate::upstream::Upstream;

pub struct FailoverInstance {
    upstreams: Vec<Upstream>,
    headers: HashMap<Upstream, HashMap<String, String>>,
    health_specs: HashMap<Upstream, HealthSpec>,
    fail_duration: Duration,
    dial_timeout: Duration,
    response_timeout: Duration,
    registration_path: String,
    display_path: Option<String>,

    pub(crate) failure_cache: Arc<FailureCache>,
    pub(crate) health_state: Arc<HealthState>,
    pub(crate) client_pool: Arc<HttpClientPool>,
    pub(crate) active_tracker: ActiveUpstreamTracker,

    health_checker: Mutex<Option<HealthChecker>>,
}

impl FailoverInstance {
    /// Validate and build an instance from a parsed [`RouteConfig`]. Every
    /// upstream URL and header value is passed through `replacer` first.
    /// `matched_path` is the host framework's matched route path, when
    /// known; `registration_path` falls back to `config.status_path`, then
    /// `matched_path`, then a synthesized `auto-<hash>` stub.
    pub fn provision(
        config: RouteConfig,
        replacer: &dyn VariableReplacer,
        matched_path: Option<String>,
    ) -> Result<Self, FailoverError> {
        if config.upstreams.is_empty() {
            return Err(FailoverError::EmptyUpstreamList);
        }

        let mut upstreams = Vec::with_capacity(config.upstreams.len());
        let mut headers = HashMap::new();
        let mut health_specs = HashMap::new();

        for upstream_cfg in &config.upstreams {
            let expanded_url = replacer.replace(&upstream_cfg.url);
            if expanded_url != upstream_cfg.url {
                info!(
                    original = %upstream_cfg.url,
                    resolved = %expanded_url,
                    "provisioning: upstream url resolved by variable replacer"
                );
            }
            let upstream =
                Upstream::parse(&expanded_url).map_err(|reason| FailoverError::InvalidUpstreamUrl {
                    url: expanded_url.clone(),
                    reason,
                })?;

            if !upstream_cfg.headers.is_empty() {
                let resolved: HashMap<String, String> = upstream_cfg
                    .headers
                    .iter()
                    .map(|(name, value)| (name.clone(), replacer.replace(value)))
                    .collect();
                headers.insert(upstream.clone(), resolved);
            }

            if let Some(hc) = &upstream_cfg.health_check {
                health_specs.insert(upstream.clone(), HealthSpec::from(hc));
            }

            upstreams.push(upstream);
        }

        let tls_insecure = config
            .upstreams
            .iter()
            .any(|u| u.insecure_skip_verify);
        let dial_timeout = Duration::from_secs_f64(config.dial_timeout_secs);
        let response_timeout = Duration::from_secs_f64(config.response_timeout_secs);
        let fail_duration = Duration::from_secs_f64(config.fail_duration_secs);

        let registration_path = config
            .status_path
            .clone()
            .or_else(|| matched_path.clone())
            .unwrap_or_else(|| auto_registration_path(&upstreams[0]));

        Ok(Self {
            upstreams,
            headers,
            health_specs,
            fail_duration,
            dial_timeout,
            response_timeout,
            registration_path,
            display_path: matched_path,
            failure_cache: Arc::new(FailureCache::new()),
            health_state: Arc::new(HealthState::new()),
            client_pool: Arc::new(HttpClientPool::new(dial_timeout, tls_insecure)),
            active_tracker: ActiveUpstreamTracker::new(),
            health_checker: Mutex::new(None),
        })
    }

    /// Spawn the per-upstream health-probe tasks. Idempotent only in the
    /// sense that calling it twice leaks the first set of tasks — callers
    /// invoke it exactly once, right after `provision`.
    pub fn start(&self) {
        if self.health_specs.is_empty() {
            return;
        }
        let targets: Vec<(Upstream, HealthSpec)> = self
            .health_specs
            .iter()
            .map(|(u, spec)| (u.clone(), spec.clone()))
            .collect();

        let checker = HealthChecker::spawn(
            targets,
            self.health_state.clone(),
            self.failure_cache.clone(),
            build_health_check_client(),
        );
        *self.health_checker.lock().expect("health checker lock poisoned") = Some(checker);
    }

    /// Terminate all health tasks and wait for them to exit. No timeout is
    /// imposed; that is a host-framework responsibility.
    pub async fn cleanup(&self) {
        let checker = self
            .health_checker
            .lock()
            .expect("health checker lock poisoned")
            .take();
        if let Some(checker) = checker {
            checker.shutdown().await;
        }
        info!(path = %self.registration_path, "instance cleanup complete");
    }

    pub fn upstreams(&self) -> &[Upstream] {
        &self.upstreams
    }

    pub fn header_overrides(&self, upstream: &Upstream) -> Option<&HashMap<String, String>> {
        self.headers.get(upstream)
    }

    pub fn has_health_check(&self, upstream: &Upstream) -> bool {
        self.health_specs.contains_key(upstream)
    }

    pub fn fail_duration(&self) -> Duration {
        self.fail_duration
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn registration_path(&self) -> &str {
        &self.registration_path
    }

    /// Path used when rendering this instance in a status snapshot: the
    /// matched handle path when present, otherwise `registration_path`.
    pub fn display_path(&self) -> &str {
        self.display_path.as_deref().unwrap_or(&self.registration_path)
    }
}

fn auto_registration_path(first_upstream: &Upstream) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    first_upstream.as_str().hash(&mut hasher);
    format!("auto-{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replacer::{EnvReplacer, NoopReplacer};

    fn cfg(toml: &str) -> RouteConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn rejects_empty_upstream_list() {
        let config = cfg("upstreams = []");
        let err = FailoverInstance::provision(config, &NoopReplacer, None).unwrap_err();
        assert!(matches!(err, FailoverError::EmptyUpstreamList));
    }

    #[test]
    fn rejects_invalid_upstream_url() {
        let config = cfg(
            r#"
            [[upstreams]]
            url = "not-a-url"
            "#,
        );
        let err = FailoverInstance::provision(config, &NoopReplacer, None).unwrap_err();
        assert!(matches!(err, FailoverError::InvalidUpstreamUrl { .. }));
    }

    #[test]
    fn explicit_status_path_wins_over_matched_path() {
        let config = cfg(
            r#"
            status_path = "/explicit"
            [[upstreams]]
            url = "http://u"
            "#,
        );
        let instance =
            FailoverInstance::provision(config, &NoopReplacer, Some("/matched".to_string()))
                .unwrap();
        assert_eq!(instance.registration_path(), "/explicit");
        assert_eq!(instance.display_path(), "/matched");
    }

    #[test]
    fn falls_back_to_matched_path_then_auto_hash() {
        let with_matched = cfg(
            r#"
            [[upstreams]]
            url = "http://u"
            "#,
        );
        let instance =
            FailoverInstance::provision(with_matched, &NoopReplacer, Some("/matched".to_string()))
                .unwrap();
        assert_eq!(instance.registration_path(), "/matched");

        let without_matched = cfg(
            r#"
            [[upstreams]]
            url = "http://u"
            "#,
        );
        let auto = FailoverInstance::provision(without_matched, &NoopReplacer, None).unwrap();
        assert!(auto.registration_path().starts_with("auto-"));
        assert_eq!(auto.display_path(), auto.registration_path());
    }

    #[test]
    fn expands_upstream_url_via_replacer() {
        std::env::set_var("FAILOVER_INSTANCE_TEST_HOST", "example.internal");
        let config = cfg(
            r#"
            [[upstreams]]
            url = "http://{env.FAILOVER_INSTANCE_TEST_HOST}"
            "#,
        );
        let instance = FailoverInstance::provision(config, &EnvReplacer, None).unwrap();
        assert_eq!(instance.upstreams()[0].host, "example.internal");
        std::env::remove_var("FAILOVER_INSTANCE_TEST_HOST");
    }

    #[test]
    fn header_override_resolved_per_upstream() {
        let config = cfg(
            r#"
            [[upstreams]]
            url = "http://u"
            [upstreams.headers]
            X-Src = "local"
            "#,
        );
        let instance = FailoverInstance::provision(config, &NoopReplacer, None).unwrap();
        let upstream = &instance.upstreams()[0];
        let headers = instance.header_overrides(upstream).unwrap();
        assert_eq!(headers.get("X-Src").map(String::as_str), Some("local"));
    }
}
