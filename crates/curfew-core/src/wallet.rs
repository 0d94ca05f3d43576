//! Access wallet and remote grant reconciliation
//!
//! The device spends grants down locally; the remote copy is only ever
//! allowed to shrink a local balance. A balance is seeded from the remote
//! side only when nothing spendable is tracked locally, and a spent balance
//! only accepts a value above the last one the remote reported, so a stale
//! remote read cannot hand back time already spent.

use curfew_api::{GrantChange, GrantChangeKind};
use curfew_store::WalletRecord;
use curfew_util::PackageId;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalletEntry {
    Active {
        remaining: Duration,
        /// Latest value reported by the remote
        last_remote: Duration,
    },
    /// Spent to zero locally. Cleared by a removal, a fresh add, a remote
    /// value above `last_remote`, or the daily reset
    Exhausted { last_remote: Duration },
}

/// Result of spending wallet time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// No active balance, or nothing elapsed
    Unchanged,
    /// Balance shrank but is still positive
    Spent { remaining: Duration },
    /// Balance hit zero; the entry is gone
    Exhausted,
}

/// Result of merging one remote grant event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// New balance from a grant with no spendable local balance
    Seeded { remaining: Duration },
    /// Remote value was smaller and replaced the local one
    Shrunk { from: Duration, to: Duration },
    /// Remote value was not smaller; local value stands
    Kept { local: Duration, remote: Duration },
    /// Remote value shrank the balance to zero
    Exhausted,
    /// Stale value for a balance already spent locally
    IgnoredTombstone,
    /// Zero-value grant with nothing to shrink
    IgnoredZero,
    /// Grant deleted remotely
    Cleared { had_balance: bool },
}

#[derive(Debug, Clone, Default)]
pub struct Wallet {
    entries: HashMap<PackageId, WalletEntry>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows
    pub fn from_records(records: HashMap<PackageId, WalletRecord>) -> Self {
        let entries = records
            .into_iter()
            .filter_map(|(package, record)| match record {
                WalletRecord::Remaining(d) if d.is_zero() => None,
                WalletRecord::Remaining(d) => Some((
                    package,
                    WalletEntry::Active {
                        remaining: d,
                        last_remote: d,
                    },
                )),
                WalletRecord::Exhausted { last_remote } => {
                    Some((package, WalletEntry::Exhausted { last_remote }))
                }
            })
            .collect();
        Self { entries }
    }

    pub fn remaining(&self, package: &PackageId) -> Duration {
        match self.entries.get(package) {
            Some(WalletEntry::Active { remaining, .. }) => *remaining,
            _ => Duration::ZERO,
        }
    }

    /// Persisted form of a package's entry, `None` when untracked
    pub fn record(&self, package: &PackageId) -> Option<WalletRecord> {
        self.entries.get(package).map(|entry| match *entry {
            WalletEntry::Active { remaining, .. } => WalletRecord::Remaining(remaining),
            WalletEntry::Exhausted { last_remote } => WalletRecord::Exhausted { last_remote },
        })
    }

    /// Spend `elapsed` from an active balance, floored at zero
    pub fn decrement(&mut self, package: &PackageId, elapsed: Duration) -> Decrement {
        let Some(WalletEntry::Active {
            remaining: current,
            last_remote,
        }) = self.entries.get(package).copied()
        else {
            return Decrement::Unchanged;
        };
        if elapsed.is_zero() {
            return Decrement::Unchanged;
        }

        let remaining = current.saturating_sub(elapsed);
        if remaining.is_zero() {
            self.entries
                .insert(package.clone(), WalletEntry::Exhausted { last_remote });
            Decrement::Exhausted
        } else {
            self.entries.insert(
                package.clone(),
                WalletEntry::Active {
                    remaining,
                    last_remote,
                },
            );
            Decrement::Spent { remaining }
        }
    }

    /// Merge a remote grant event under the anti-rollback rule.
    ///
    /// Our own pushes only ever lower the remote value, so for a spent
    /// balance a remote value at or below the last one seen is an echo,
    /// while a larger one is a new grant.
    pub fn reconcile(&mut self, change: &GrantChange) -> Reconciled {
        let package = &change.package;
        let remote = change.remaining();

        if change.kind == GrantChangeKind::Removed {
            let had_balance = matches!(
                self.entries.remove(package),
                Some(WalletEntry::Active { .. })
            );
            return Reconciled::Cleared { had_balance };
        }

        match (self.entries.get(package).copied(), change.kind) {
            (Some(WalletEntry::Active { remaining: local, .. }), _) => {
                if remote >= local {
                    self.entries.insert(
                        package.clone(),
                        WalletEntry::Active {
                            remaining: local,
                            last_remote: remote,
                        },
                    );
                    Reconciled::Kept { local, remote }
                } else if remote.is_zero() {
                    self.entries.insert(
                        package.clone(),
                        WalletEntry::Exhausted {
                            last_remote: Duration::ZERO,
                        },
                    );
                    Reconciled::Exhausted
                } else {
                    self.entries.insert(
                        package.clone(),
                        WalletEntry::Active {
                            remaining: remote,
                            last_remote: remote,
                        },
                    );
                    Reconciled::Shrunk {
                        from: local,
                        to: remote,
                    }
                }
            }
            (Some(WalletEntry::Exhausted { last_remote }), GrantChangeKind::Modified)
                if remote <= last_remote =>
            {
                self.entries.insert(
                    package.clone(),
                    WalletEntry::Exhausted {
                        last_remote: remote,
                    },
                );
                Reconciled::IgnoredTombstone
            }
            _ if remote.is_zero() => Reconciled::IgnoredZero,
            _ => {
                self.entries.insert(
                    package.clone(),
                    WalletEntry::Active {
                        remaining: remote,
                        last_remote: remote,
                    },
                );
                Reconciled::Seeded { remaining: remote }
            }
        }
    }

    /// Drop all state for a package; returns whether anything was held
    pub fn purge(&mut self, package: &PackageId) -> bool {
        self.entries.remove(package).is_some()
    }

    /// Forget spent balances at the day boundary; returns how many
    pub fn prune_exhausted(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| matches!(entry, WalletEntry::Active { .. }));
        before - self.entries.len()
    }
}
