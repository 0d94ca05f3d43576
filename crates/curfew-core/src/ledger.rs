//! Usage ledger: cumulative foreground time per package for the current day

use chrono::NaiveDate;
use curfew_util::PackageId;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UsageLedger {
    day: NaiveDate,
    used: HashMap<PackageId, Duration>,
}

impl UsageLedger {
    pub fn new(day: NaiveDate, used: HashMap<PackageId, Duration>) -> Self {
        Self { day, used }
    }

    /// Calendar day the counters belong to
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn used_today(&self, package: &PackageId) -> Duration {
        self.used.get(package).copied().unwrap_or(Duration::ZERO)
    }

    /// Add `elapsed` to a package and return the new total.
    ///
    /// Counters only grow within a day.
    pub fn accrue(&mut self, package: &PackageId, elapsed: Duration) -> Duration {
        let total = self.used.entry(package.clone()).or_insert(Duration::ZERO);
        *total = total.saturating_add(elapsed);
        *total
    }

    /// Zero every counter and move to `day`
    pub fn reset(&mut self, day: NaiveDate) {
        self.used.clear();
        self.day = day;
    }
}
