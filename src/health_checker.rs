//! HealthChecker: one background task per upstream with a health spec,
//! probing on its own interval and updating HealthState / clearing
//! FailureCache on recovery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::HealthCheckConfig;
use crate::failure_cache::FailureCache;
use crate::health_state::HealthState;
use crate::upstream::Upstream;

pub const HEALTH_CHECK_USER_AGENT: &str = "Caddy-failover-health-check/1.0";

/// A fully-resolved health spec bound to one upstream.
#[derive(Debug, Clone)]
pub struct HealthSpec {
    pub path: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub expected_status: u16,
}

impl From<&HealthCheckConfig> for HealthSpec {
    fn from(cfg: &HealthCheckConfig) -> Self {
        Self {
            path: cfg.path.clone(),
            interval: Duration::from_secs(cfg.interval_secs),
            timeout: Duration::from_secs(cfg.timeout_secs),
            expected_status: cfg.expected_status,
        }
    }
}

/// Builds the shared `reqwest::Client` used by all probes for one instance.
/// Separate from [`crate::client_pool::HttpClientPool`], which carries
/// request traffic — probes never share a transport with proxied requests.
pub fn build_health_check_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(HEALTH_CHECK_USER_AGENT)
        .no_proxy()
        .build()
        .expect("failed to build health check client")
}

/// Owns the per-upstream probe tasks for one instance and the shutdown
/// signal used to cancel them.
pub struct HealthChecker {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl HealthChecker {
    /// Spawn one task per `(upstream, spec)` pair. The first probe for each
    /// upstream fires immediately, not after one interval.
    pub fn spawn(
        targets: Vec<(Upstream, HealthSpec)>,
        health_state: Arc<HealthState>,
        failure_cache: Arc<FailureCache>,
        client: reqwest::Client,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(targets.len());

        for (upstream, spec) in targets {
            let health_state = health_state.clone();
            let failure_cache = failure_cache.clone();
            let client = client.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    probe_once(&client, &upstream, &spec, &health_state, &failure_cache).await;

                    tokio::select! {
                        _ = tokio::time::sleep(spec.interval) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }));
        }

        Self {
            handles,
            shutdown: shutdown_tx,
        }
    }

    /// Signal every probe task to stop and wait for all of them to exit
    /// before cleanup completes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn probe_once(
    client: &reqwest::Client,
    upstream: &Upstream,
    spec: &HealthSpec,
    health_state: &HealthState,
    failure_cache: &FailureCache,
) {
    let url = format!("{}{}", upstream.authority(), spec.path);
    let started = Instant::now();

    let result = client.get(&url).timeout(spec.timeout).send().await;

    let (healthy, latency) = match result {
        Ok(resp) => {
            let status_matches = resp.status().as_u16() == spec.expected_status;
            // Drain the body so the connection can be reused.
            let _ = resp.bytes().await;
            (status_matches, Some(started.elapsed()))
        }
        Err(_) => (false, None),
    };

    let previous = health_state.record(upstream, healthy, latency);

    if previous != Some(healthy) {
        if healthy {
            info!(upstream = %upstream, "health check: upstream transitioned to healthy");
            failure_cache.clear(upstream);
        } else {
            warn!(upstream = %upstream, "health check: upstream transitioned to unhealthy");
        }
    }
}
