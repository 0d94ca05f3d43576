//! Core events emitted by the engine

use chrono::NaiveDate;
use curfew_api::{BlockNotice, BlockReason, EnforcementStopReason, GrantChangeKind};
use curfew_util::{PackageId, SessionId};
use std::time::Duration;

/// Events emitted by the core engine.
///
/// Events that name a collaborator call (`CorrectiveAction`, `NotifyPartner`,
/// `WalletPush`, `ClearGrant`, `RefreshLimits`, enforcement start/stop) are
/// instructions for the service; the rest are informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Foreground package started accruing
    SessionStarted {
        session_id: SessionId,
        package: PackageId,
    },

    /// Foreground session closed
    SessionEnded {
        session_id: SessionId,
        package: PackageId,
        duration: Duration,
    },

    /// Daily limit is close (once per package per day)
    Warning {
        package: PackageId,
        remaining: Duration,
    },

    /// Package transitioned into Blocked
    BlockEntered {
        package: PackageId,
        reason: BlockReason,
    },

    /// Cached block cleared
    Unblocked { package: PackageId },

    /// Tell the partner about the block (once per transition)
    NotifyPartner(BlockNotice),

    /// Move the device away from the package
    CorrectiveAction { package: PackageId },

    /// Schedule periodic re-checks for this loop
    EnforcementStarted { package: PackageId, generation: u64 },

    /// Cancel re-checks for this loop
    EnforcementStopped {
        package: PackageId,
        generation: u64,
        reason: EnforcementStopReason,
    },

    /// Publish the local wallet balance upstream
    WalletPush {
        package: PackageId,
        remaining: Duration,
    },

    /// Local wallet spent to zero
    WalletExhausted { package: PackageId },

    /// Delete the spent grant upstream so the next approval starts fresh
    ClearGrant { package: PackageId },

    /// Remote grant merged into the wallet
    GrantApplied {
        package: PackageId,
        kind: GrantChangeKind,
        remaining: Duration,
    },

    /// Fetch fresh limits for these packages
    RefreshLimits { packages: Vec<PackageId> },

    /// Calendar day rolled over
    DailyReset { day: NaiveDate },
}
