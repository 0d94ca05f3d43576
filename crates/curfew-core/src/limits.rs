//! Cached per-package daily limits

use curfew_util::PackageId;
use std::collections::HashMap;
use std::time::Duration;

/// Result of one remote limit fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitFetch {
    /// Partner configured this many minutes (zero means closed unless granted)
    Configured { minutes: u32 },
    /// No limit document exists remotely
    NotConfigured,
    /// Transport or server failure
    Failed,
}

/// What applying a fetch did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitUpdate {
    /// Fetch failed; previous value stays authoritative
    KeptStale,
    /// Cache already held this value
    Unchanged,
    /// New value cached; `previous` is the effective limit before the fetch
    Stored { previous: Duration, limit: Duration },
}

impl LimitUpdate {
    /// Whether the effective limit moved
    pub fn changed(&self) -> bool {
        matches!(self, LimitUpdate::Stored { previous, limit } if previous != limit)
    }
}

/// Last-fetch-wins cache of daily limits.
///
/// Packages never fetched, or fetched without a configured limit, get the
/// policy default so a new package is restricted but usable.
#[derive(Debug, Clone)]
pub struct LimitCache {
    default_limit: Duration,
    limits: HashMap<PackageId, Duration>,
}

impl LimitCache {
    pub fn new(default_limit: Duration, limits: HashMap<PackageId, Duration>) -> Self {
        Self {
            default_limit,
            limits,
        }
    }

    pub fn get_limit(&self, package: &PackageId) -> Duration {
        self.limits
            .get(package)
            .copied()
            .unwrap_or(self.default_limit)
    }

    pub fn set_default(&mut self, default_limit: Duration) {
        self.default_limit = default_limit;
    }

    pub fn apply(&mut self, package: &PackageId, fetch: LimitFetch) -> LimitUpdate {
        let limit = match fetch {
            LimitFetch::Failed => return LimitUpdate::KeptStale,
            LimitFetch::Configured { minutes } => Duration::from_secs(u64::from(minutes) * 60),
            LimitFetch::NotConfigured => self.default_limit,
        };

        let cached = self.limits.get(package).copied();
        if cached == Some(limit) {
            return LimitUpdate::Unchanged;
        }

        let previous = cached.unwrap_or(self.default_limit);
        self.limits.insert(package.clone(), limit);
        LimitUpdate::Stored { previous, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn unknown_package_gets_default() {
        let cache = LimitCache::new(DEFAULT, HashMap::new());
        assert_eq!(cache.get_limit(&"com.example.game".into()), DEFAULT);
    }

    #[test]
    fn configured_limit_overwrites() {
        let mut cache = LimitCache::new(DEFAULT, HashMap::new());
        let game = PackageId::new("com.example.game");

        let update = cache.apply(&game, LimitFetch::Configured { minutes: 45 });
        assert!(update.changed());
        assert_eq!(cache.get_limit(&game), Duration::from_secs(45 * 60));

        let update = cache.apply(&game, LimitFetch::Configured { minutes: 0 });
        assert_eq!(
            update,
            LimitUpdate::Stored {
                previous: Duration::from_secs(45 * 60),
                limit: Duration::ZERO
            }
        );
        assert_eq!(cache.get_limit(&game), Duration::ZERO);
    }

    #[test]
    fn failure_keeps_stale_value() {
        let mut cache = LimitCache::new(DEFAULT, HashMap::new());
        let game = PackageId::new("com.example.game");
        cache.apply(&game, LimitFetch::Configured { minutes: 10 });

        assert_eq!(cache.apply(&game, LimitFetch::Failed), LimitUpdate::KeptStale);
        assert_eq!(cache.get_limit(&game), Duration::from_secs(600));
    }

    #[test]
    fn missing_remote_entry_falls_back_to_default() {
        let mut cache = LimitCache::new(DEFAULT, HashMap::new());
        let game = PackageId::new("com.example.game");
        cache.apply(&game, LimitFetch::Configured { minutes: 10 });

        let update = cache.apply(&game, LimitFetch::NotConfigured);
        assert!(update.changed());
        assert_eq!(cache.get_limit(&game), DEFAULT);
    }

    #[test]
    fn first_fetch_of_default_is_stored_but_unchanged() {
        let mut cache = LimitCache::new(DEFAULT, HashMap::new());
        let game = PackageId::new("com.example.game");

        let update = cache.apply(&game, LimitFetch::NotConfigured);
        assert!(matches!(update, LimitUpdate::Stored { .. }));
        assert!(!update.changed());

        assert_eq!(
            cache.apply(&game, LimitFetch::NotConfigured),
            LimitUpdate::Unchanged
        );
    }
}
