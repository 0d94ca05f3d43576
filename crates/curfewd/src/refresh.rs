//! Limit refresh batching
//!
//! At most one batch of limit fetches runs at a time. Requests made while a
//! batch is running are merged and handed out when it finishes, so a package
//! selected mid-refresh is still fetched.

use curfew_util::PackageId;

#[derive(Debug, Default)]
pub struct LimitRefresh {
    in_flight: bool,
    queued: Vec<PackageId>,
}

impl LimitRefresh {
    /// Packages to fetch now, or `None` if a batch is already running (the
    /// packages are queued behind it) or nothing was asked for
    pub fn request(&mut self, packages: Vec<PackageId>) -> Option<Vec<PackageId>> {
        if packages.is_empty() {
            return None;
        }
        if self.in_flight {
            for package in packages {
                if !self.queued.contains(&package) {
                    self.queued.push(package);
                }
            }
            return None;
        }

        self.in_flight = true;
        Some(packages)
    }

    /// The running batch finished; returns the queued packages to fetch next
    pub fn finish(&mut self) -> Option<Vec<PackageId>> {
        self.in_flight = false;
        let queued = std::mem::take(&mut self.queued);
        self.request(queued)
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }
}
