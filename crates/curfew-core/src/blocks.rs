//! "Blocked today" markers

use chrono::{DateTime, Local};
use curfew_util::{PackageId, is_same_calendar_day};
use std::collections::HashMap;

/// Timestamps of the last transition into Blocked, per package.
///
/// A marker is only trusted on the calendar day it was set. Invalidation is
/// explicit: wallet time added, package deselected, daily reset, limit change.
#[derive(Debug, Clone, Default)]
pub struct BlockCache {
    markers: HashMap<PackageId, DateTime<Local>>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker for `package` if it was set today
    pub fn marker(&self, package: &PackageId, now: DateTime<Local>) -> Option<DateTime<Local>> {
        self.markers
            .get(package)
            .copied()
            .filter(|since| is_same_calendar_day(since, &now))
    }

    /// Record a block; returns true on a transition into Blocked
    pub fn mark(&mut self, package: &PackageId, now: DateTime<Local>) -> bool {
        if self.marker(package, now).is_some() {
            return false;
        }
        self.markers.insert(package.clone(), now);
        true
    }

    /// Drop a marker; returns whether one was present
    pub fn invalidate(&mut self, package: &PackageId) -> bool {
        self.markers.remove(package).is_some()
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mark_reports_transition_once() {
        let mut cache = BlockCache::new();
        let game = PackageId::new("com.example.game");
        let noon = Local.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert!(cache.mark(&game, noon));
        assert!(!cache.mark(&game, noon + chrono::Duration::minutes(5)));
        assert_eq!(cache.marker(&game, noon), Some(noon));
    }

    #[test]
    fn yesterdays_marker_is_not_trusted() {
        let mut cache = BlockCache::new();
        let game = PackageId::new("com.example.game");
        let late = Local.with_ymd_and_hms(2025, 6, 1, 23, 59, 0).unwrap();
        let next = Local.with_ymd_and_hms(2025, 6, 2, 0, 1, 0).unwrap();

        cache.mark(&game, late);
        assert_eq!(cache.marker(&game, next), None);

        // A block on the new day is a fresh transition
        assert!(cache.mark(&game, next));
    }

    #[test]
    fn invalidate_and_clear() {
        let mut cache = BlockCache::new();
        let now = Local.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        cache.mark(&"com.a".into(), now);
        cache.mark(&"com.b".into(), now);

        assert!(cache.invalidate(&"com.a".into()));
        assert!(!cache.invalidate(&"com.a".into()));

        cache.clear();
        assert_eq!(cache.marker(&"com.b".into(), now), None);
    }
}
