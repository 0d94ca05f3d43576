//! Store trait definitions

use chrono::NaiveDate;
use curfew_util::PackageId;
use std::collections::HashMap;
use std::time::Duration;

use crate::{AuditEvent, StoreResult};

/// Persisted wallet row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletRecord {
    /// Active balance
    Remaining(Duration),
    /// Spent locally. `last_remote` is the latest value seen from the
    /// remote; only a larger one counts as a new grant
    Exhausted { last_remote: Duration },
}

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Usage ledger

    /// Usage of one package on a specific day
    fn get_usage(&self, package: &PackageId, day: NaiveDate) -> StoreResult<Duration>;

    /// Overwrite usage of one package on a specific day
    fn set_usage(&self, package: &PackageId, day: NaiveDate, used: Duration) -> StoreResult<()>;

    /// All usage rows for a day
    fn load_usage(&self, day: NaiveDate) -> StoreResult<HashMap<PackageId, Duration>>;

    // Daily reset

    /// Day of the last completed reset
    fn get_last_reset_day(&self) -> StoreResult<Option<NaiveDate>>;

    /// Drop usage older than `day` and exhausted wallets, and record `day`
    /// as reset, atomically
    fn commit_reset(&self, day: NaiveDate) -> StoreResult<()>;

    // Wallets

    fn load_wallets(&self) -> StoreResult<HashMap<PackageId, WalletRecord>>;

    fn save_wallet(&self, package: &PackageId, record: &WalletRecord) -> StoreResult<()>;

    fn delete_wallet(&self, package: &PackageId) -> StoreResult<()>;

    // Limits

    fn load_limits(&self) -> StoreResult<HashMap<PackageId, Duration>>;

    fn save_limit(&self, package: &PackageId, limit: Duration) -> StoreResult<()>;

    // Selection

    fn load_selection(&self) -> StoreResult<Vec<PackageId>>;

    /// Replace the whole selection set
    fn save_selection(&self, packages: &[PackageId]) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
