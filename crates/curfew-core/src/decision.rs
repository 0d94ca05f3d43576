//! Blocking decision

use chrono::{DateTime, Local};
use curfew_api::{BlockReason, PackageState, Verdict};
use curfew_util::is_same_calendar_day;
use std::time::Duration;

/// Decide whether a package may be used right now.
///
/// Pure: callers purge state for unselected packages themselves.
pub fn decide(state: &PackageState, warning_threshold: Duration, now: DateTime<Local>) -> Verdict {
    if !state.is_user_selected {
        return Verdict::Allow;
    }

    // An active grant pre-empts every limit
    if !state.wallet_remaining.is_zero() {
        return Verdict::Allow;
    }

    if let Some(since) = state.block_marker
        && is_same_calendar_day(&since, &now)
    {
        return Verdict::Block {
            reason: BlockReason::BlockedToday { since },
        };
    }

    if state.daily_limit.is_zero() {
        return Verdict::Block {
            reason: BlockReason::ZeroLimit,
        };
    }

    if state.used_today >= state.daily_limit {
        return Verdict::Block {
            reason: BlockReason::LimitExhausted {
                used: state.used_today,
                limit: state.daily_limit,
            },
        };
    }

    let remaining = state.daily_limit - state.used_today;
    if remaining <= warning_threshold {
        return Verdict::WarnSoon { remaining };
    }

    Verdict::Allow
}
