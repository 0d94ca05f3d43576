//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use curfew_api::{BlockReason, GrantChangeKind};
use curfew_util::PackageId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Config reload requested
    ConfigReloaded { success: bool },

    /// The user changed the selected-package set
    SelectionChanged {
        added: Vec<PackageId>,
        removed: Vec<PackageId>,
    },

    /// Package transitioned into Blocked
    PackageBlocked {
        package: PackageId,
        reason: BlockReason,
    },

    /// Cached block cleared (grant, limit change, deselection)
    PackageUnblocked { package: PackageId },

    /// Remote grant event merged into the local wallet
    GrantApplied {
        package: PackageId,
        kind: GrantChangeKind,
        remote_remaining: Duration,
        local_remaining: Duration,
    },

    /// Wallet spent down to zero locally
    WalletExhausted { package: PackageId },

    /// Remote limit differs from the cached one
    LimitChanged {
        package: PackageId,
        old: Duration,
        new: Duration,
    },

    /// Calendar day rolled over
    DailyReset { day: NaiveDate },

    /// Enforcement loop gave up with the block still in place
    EnforcementExpired { package: PackageId, attempts: u32 },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(event, curfew_util::now())
    }

    /// Event stamped with an explicit wall-clock time
    pub fn at(event: AuditEventType, timestamp: DateTime<Local>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
