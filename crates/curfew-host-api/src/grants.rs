//! Grant snapshots and snapshot diffing
//!
//! The remote exposes grants as a collection of documents. Polling it yields
//! successive snapshots; comparing two of them recovers the add/modify/remove
//! event stream the engine reconciles against.

use curfew_api::GrantChange;
use curfew_util::PackageId;
use std::collections::BTreeMap;
use std::time::Duration;

/// Grant documents at one point in time, keyed by package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSnapshot {
    grants: BTreeMap<PackageId, Duration>,
}

impl GrantSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: PackageId, remaining: Duration) {
        self.grants.insert(package, remaining);
    }

    pub fn remove(&mut self, package: &PackageId) -> Option<Duration> {
        self.grants.remove(package)
    }

    pub fn get(&self, package: &PackageId) -> Option<Duration> {
        self.grants.get(package).copied()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Changes that turn `self` into `next`, in package order
    pub fn diff(&self, next: &GrantSnapshot) -> Vec<GrantChange> {
        let mut changes = Vec::new();

        for (package, &remaining) in &next.grants {
            match self.grants.get(package) {
                None => changes.push(GrantChange::added(package.clone(), remaining)),
                Some(&old) if old != remaining => {
                    changes.push(GrantChange::modified(package.clone(), remaining))
                }
                Some(_) => {}
            }
        }

        for package in self.grants.keys() {
            if !next.grants.contains_key(package) {
                changes.push(GrantChange::removed(package.clone()));
            }
        }

        changes
    }

    /// Changes for a snapshot seen without a predecessor (first poll after
    /// start). Documents are reported as modifications: they can seed or
    /// lower a balance but never revive one that was spent locally.
    pub fn baseline(&self) -> Vec<GrantChange> {
        self.grants
            .iter()
            .map(|(package, &remaining)| GrantChange::modified(package.clone(), remaining))
            .collect()
    }
}

impl FromIterator<(PackageId, Duration)> for GrantSnapshot {
    fn from_iter<T: IntoIterator<Item = (PackageId, Duration)>>(iter: T) -> Self {
        Self {
            grants: iter.into_iter().collect(),
        }
    }
}
