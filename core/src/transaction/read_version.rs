//! Process-wide read-version cache.
//!
//! Stores the most recent known `(version, timestamp)` pair. Staleness is
//! judged on the monotonic clock, never wall time. Updates are conditional on
//! version monotonicity, so a slow commit can never regress the cache.

use super::options::ReadVersionPolicy;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Default)]
pub struct ReadVersionCache {
    inner: Mutex<Option<(i64, Instant)>>,
}

impl ReadVersionCache {
    pub fn new() -> Self { Self::default() }

    /// A version usable under `policy`, if the cache holds one.
    pub fn get(&self, policy: ReadVersionPolicy) -> Option<i64> {
        let inner = self.inner.lock().unwrap();
        let (version, at) = (*inner)?;
        match policy {
            ReadVersionPolicy::Server => None,
            ReadVersionPolicy::Cached => Some(version),
            ReadVersionPolicy::Stale(max_age) => (at.elapsed() <= max_age).then_some(version),
        }
    }

    /// Record a version observed from the store. Commit versions pass through
    /// here too and override read versions by virtue of being newer.
    pub fn update(&self, version: i64) {
        let mut inner = self.inner.lock().unwrap();
        match *inner {
            Some((current, _)) if current >= version => {}
            _ => *inner = Some((version, Instant::now())),
        }
    }
}
