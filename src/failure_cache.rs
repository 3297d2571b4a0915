//! FailureCache: per-upstream timestamp of last failure, TTL eviction at
//! read, no background sweeper.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

use crate::upstream::Upstream;

/// Monotonic timestamp for TTL math plus a wall-clock mirror for display —
/// same split as [`crate::health_state::HealthEntry`].
#[derive(Debug, Clone, Copy)]
struct FailureEntry {
    at: Instant,
    at_wall: SystemTime,
}

/// Guarded by a single reader/writer lock at instance scope: reads take the
/// shared lock, writes take the exclusive lock, and no lock is ever held
/// across network I/O.
#[derive(Debug, Default)]
pub struct FailureCache {
    entries: RwLock<HashMap<Upstream, FailureEntry>>,
}

impl FailureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `now` as the last-failure time for `upstream`. Marking twice
    /// within the same interval is idempotent in effect: both writes leave
    /// `is_failed` returning true until `fail_duration` elapses from the
    /// later write.
    pub fn mark(&self, upstream: &Upstream) {
        let mut entries = self.entries.write().expect("failure cache lock poisoned");
        entries.insert(
            upstream.clone(),
            FailureEntry {
                at: Instant::now(),
                at_wall: SystemTime::now(),
            },
        );
    }

    /// True iff an entry exists for `upstream` and is younger than
    /// `fail_duration`. Stale entries are simply ignored, not removed —
    /// there is no background sweeper.
    pub fn is_failed(&self, upstream: &Upstream, fail_duration: Duration) -> bool {
        let entries = self.entries.read().expect("failure cache lock poisoned");
        match entries.get(upstream) {
            Some(entry) => entry.at.elapsed() < fail_duration,
            None => false,
        }
    }

    /// Wall-clock time of the last recorded failure, if any, regardless of
    /// whether it's still within `fail_duration`. Used by status rendering.
    pub fn last_failure(&self, upstream: &Upstream) -> Option<SystemTime> {
        let entries = self.entries.read().expect("failure cache lock poisoned");
        entries.get(upstream).map(|entry| entry.at_wall)
    }

    /// Delete `upstream`'s entry, if any. Called on request success and on
    /// a health-check transition to healthy.
    pub fn clear(&self, upstream: &Upstream) {
        let mut entries = self.entries.write().expect("failure cache lock poisoned");
        entries.remove(upstream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::Upstream;
    use std::thread::sleep;

    fn u(s: &str) -> Upstream {
        Upstream::parse(s).unwrap()
    }

    #[test]
    fn fresh_mark_is_failed() {
        let cache = FailureCache::new();
        let a = u("http://a");
        cache.mark(&a);
        assert!(cache.is_failed(&a, Duration::from_secs(30)));
    }

    #[test]
    fn unmarked_upstream_is_not_failed() {
        let cache = FailureCache::new();
        assert!(!cache.is_failed(&u("http://a"), Duration::from_secs(30)));
    }

    #[test]
    fn entry_expires_after_fail_duration() {
        let cache = FailureCache::new();
        let a = u("http://a");
        cache.mark(&a);
        sleep(Duration::from_millis(30));
        assert!(!cache.is_failed(&a, Duration::from_millis(10)));
    }

    #[test]
    fn clear_removes_entry() {
        let cache = FailureCache::new();
        let a = u("http://a");
        cache.mark(&a);
        cache.clear(&a);
        assert!(!cache.is_failed(&a, Duration::from_secs(30)));
    }

    /// Idempotent-mark law: marking twice in the same interval behaves the
    /// same as marking once.
    #[test]
    fn idempotent_double_mark() {
        let cache = FailureCache::new();
        let a = u("http://a");
        cache.mark(&a);
        cache.mark(&a);
        assert!(cache.is_failed(&a, Duration::from_secs(30)));
    }

    #[test]
    fn scenario_failure_cache_ttl() {
        let cache = FailureCache::new();
        let a = u("http://a");
        let fail_duration = Duration::from_millis(200);

        cache.mark(&a);
        assert!(cache.is_failed(&a, fail_duration));

        sleep(Duration::from_millis(50));
        assert!(cache.is_failed(&a, fail_duration));

        sleep(Duration::from_millis(200));
        assert!(!cache.is_failed(&a, fail_duration));
    }
}
