//! HealthState: in-memory map from upstream to
//! {healthy?, last_check, last_latency_ms}.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

use crate::upstream::Upstream;

/// One upstream's current health snapshot. `healthy` is `None` until the
/// first probe completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthEntry {
    pub healthy: Option<bool>,
    pub last_check: Option<Instant>,
    /// Wall-clock mirror of `last_check`, carried alongside it so status
    /// rendering can report a real timestamp instead of a monotonic one.
    pub last_check_wall: Option<SystemTime>,
    pub last_latency_ms: Option<u64>,
}

/// Guarded by a single reader/writer lock at instance scope, same discipline
/// as [`crate::failure_cache::FailureCache`].
#[derive(Debug, Default)]
pub struct HealthState {
    entries: RwLock<HashMap<Upstream, HealthEntry>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if no health check is configured for this upstream, or none
    /// has run yet. Used by the engine's upstream-skip decision.
    pub fn is_known_unhealthy(&self, upstream: &Upstream) -> bool {
        let entries = self.entries.read().expect("health state lock poisoned");
        matches!(entries.get(upstream), Some(e) if e.healthy == Some(false))
    }

    pub fn get(&self, upstream: &Upstream) -> Option<HealthEntry> {
        let entries = self.entries.read().expect("health state lock poisoned");
        entries.get(upstream).copied()
    }

    /// Record the outcome of a probe. Returns the previous `healthy` value
    /// so the caller can detect a transition.
    pub fn record(
        &self,
        upstream: &Upstream,
        healthy: bool,
        latency: Option<Duration>,
    ) -> Option<bool> {
        let mut entries = self.entries.write().expect("health state lock poisoned");
        let entry = entries.entry(upstream.clone()).or_default();
        let previous = entry.healthy;
        entry.healthy = Some(healthy);
        entry.last_check = Some(Instant::now());
        entry.last_check_wall = Some(SystemTime::now());
        if let Some(d) = latency {
            entry.last_latency_ms = Some(d.as_millis() as u64);
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::Upstream;

    fn u(s: &str) -> Upstream {
        Upstream::parse(s).unwrap()
    }

    #[test]
    fn unknown_upstream_is_not_known_unhealthy() {
        let hs = HealthState::new();
        assert!(!hs.is_known_unhealthy(&u("http://a")));
    }

    #[test]
    fn first_probe_transitions_from_none() {
        let hs = HealthState::new();
        let a = u("http://a");
        let previous = hs.record(&a, true, Some(Duration::from_millis(5)));
        assert_eq!(previous, None);
        let entry = hs.get(&a).unwrap();
        assert_eq!(entry.healthy, Some(true));
        assert_eq!(entry.last_latency_ms, Some(5));
    }

    #[test]
    fn unhealthy_probe_marks_known_unhealthy() {
        let hs = HealthState::new();
        let a = u("http://a");
        hs.record(&a, false, None);
        assert!(hs.is_known_unhealthy(&a));
    }

    #[test]
    fn transition_detection_via_previous_value() {
        let hs = HealthState::new();
        let a = u("http://a");
        hs.record(&a, true, Some(Duration::from_millis(1)));
        let previous = hs.record(&a, false, Some(Duration::from_millis(1)));
        assert_eq!(previous, Some(true));
    }
}
