//! Shared types for the curfewd engine and its collaborators

use chrono::{DateTime, Local, NaiveDate};
use curfew_util::{PackageId, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of evaluating one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Package may be used
    Allow,
    /// Package may be used, but the daily limit is close
    WarnSoon { remaining: Duration },
    /// Package must be removed from the foreground
    Block { reason: BlockReason },
}

impl Verdict {
    pub fn is_block(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }

    pub fn is_allowed(&self) -> bool {
        !self.is_block()
    }
}

/// Why a package was blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum BlockReason {
    /// Configured daily limit is zero and no grant is active
    ZeroLimit,
    /// Usage today reached the daily limit
    LimitExhausted { used: Duration, limit: Duration },
    /// Package was already blocked earlier today
    BlockedToday { since: DateTime<Local> },
}

/// Kind of change observed on the remote grant collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantChangeKind {
    /// A new grant document appeared
    Added,
    /// An existing grant document changed
    Modified,
    /// The grant document was deleted (revoked or expired)
    Removed,
}

/// One remote grant event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantChange {
    pub package: PackageId,
    pub kind: GrantChangeKind,
    /// Remaining balance as reported remotely; ignored for `Removed`
    #[serde(default)]
    pub remaining_millis: u64,
}

impl GrantChange {
    pub fn added(package: impl Into<PackageId>, remaining: Duration) -> Self {
        Self {
            package: package.into(),
            kind: GrantChangeKind::Added,
            remaining_millis: duration_to_millis(remaining),
        }
    }

    pub fn modified(package: impl Into<PackageId>, remaining: Duration) -> Self {
        Self {
            package: package.into(),
            kind: GrantChangeKind::Modified,
            remaining_millis: duration_to_millis(remaining),
        }
    }

    pub fn removed(package: impl Into<PackageId>) -> Self {
        Self {
            package: package.into(),
            kind: GrantChangeKind::Removed,
            remaining_millis: 0,
        }
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_millis)
    }
}

/// Payload sent to the partner when a package transitions into Blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNotice {
    pub package: PackageId,
    #[serde(with = "millis")]
    pub used: Duration,
    #[serde(with = "millis")]
    pub limit: Duration,
    pub blocked_at: DateTime<Local>,
}

/// Enforcement loop phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementPhase {
    Idle,
    Enforcing,
    Expired,
}

/// Why an enforcement loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementStopReason {
    /// Re-evaluation allowed the package (grant arrived, limit raised)
    Unblocked,
    /// The blocked package left the foreground
    LeftForeground,
    /// Package dropped from the selection set
    Deselected,
    /// A new loop for another package replaced this one
    Superseded,
    /// Attempt budget exhausted; block persists
    AttemptsExhausted,
    /// Daily reset cleared all block state
    DailyReset,
}

/// Per-package state as seen by the decision engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    pub package_id: PackageId,
    pub used_today: Duration,
    pub daily_limit: Duration,
    pub wallet_remaining: Duration,
    pub block_marker: Option<DateTime<Local>>,
    pub is_user_selected: bool,
}

/// Open foreground session information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub package: PackageId,
    pub started_at: DateTime<Local>,
    /// Time since the session opened
    pub open_for: Duration,
}

/// Enforcement loop information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementInfo {
    pub package: PackageId,
    pub phase: EnforcementPhase,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Full engine state snapshot (diagnostics)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub api_version: u32,
    pub day: NaiveDate,
    pub foreground: Option<PackageId>,
    pub session: Option<SessionInfo>,
    pub enforcement: Option<EnforcementInfo>,
    pub packages: Vec<PackageState>,
}

fn duration_to_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Serialize durations as integer milliseconds on the wire
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
