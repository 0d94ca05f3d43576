//! Foreground session tracking
//!
//! At most one session is open. Time is measured on the monotonic clock and
//! handed out in slices: each rollover returns the time since the previous
//! one, so long foreground stretches accrue every tick instead of only when
//! the user switches apps.

use chrono::{DateTime, Local};
use curfew_api::SessionInfo;
use curfew_util::{MonotonicInstant, PackageId, SessionId};
use std::time::Duration;

/// The currently open session
#[derive(Debug, Clone)]
struct OpenSession {
    session_id: SessionId,
    package: PackageId,
    /// Wall-clock start (display/logging only)
    started_at: DateTime<Local>,
    started_mono: MonotonicInstant,
    /// Point up to which time has been handed out
    accounted_until: MonotonicInstant,
}

/// Time accrued by the open session since the last rollover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSlice {
    pub package: PackageId,
    pub elapsed: Duration,
}

/// A session that was just closed
#[derive(Debug, Clone)]
pub struct ClosedSession {
    pub session_id: SessionId,
    pub package: PackageId,
    /// Time not yet handed out by a rollover
    pub elapsed: Duration,
    /// Whole session length
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    open: Option<OpenSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&PackageId> {
        self.open.as_ref().map(|s| &s.package)
    }

    /// Open a session, closing any previous one first
    pub fn open(
        &mut self,
        package: PackageId,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> (SessionId, Option<ClosedSession>) {
        let previous = self.close(now_mono);
        let session_id = SessionId::new();

        self.open = Some(OpenSession {
            session_id: session_id.clone(),
            package,
            started_at: now,
            started_mono: now_mono,
            accounted_until: now_mono,
        });

        (session_id, previous)
    }

    /// Hand out the time since the last rollover, keeping the session open
    pub fn rollover(&mut self, now_mono: MonotonicInstant) -> Option<SessionSlice> {
        let session = self.open.as_mut()?;
        let elapsed = now_mono.duration_since(session.accounted_until);
        session.accounted_until = session.accounted_until.max(now_mono);

        Some(SessionSlice {
            package: session.package.clone(),
            elapsed,
        })
    }

    pub fn close(&mut self, now_mono: MonotonicInstant) -> Option<ClosedSession> {
        let session = self.open.take()?;

        Some(ClosedSession {
            elapsed: now_mono.duration_since(session.accounted_until),
            duration: now_mono.duration_since(session.started_mono),
            session_id: session.session_id,
            package: session.package,
        })
    }

    pub fn info(&self, now_mono: MonotonicInstant) -> Option<SessionInfo> {
        self.open.as_ref().map(|s| SessionInfo {
            session_id: s.session_id.clone(),
            package: s.package.clone(),
            started_at: s.started_at,
            open_for: now_mono.duration_since(s.started_mono),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollover_hands_out_disjoint_slices() {
        let mut tracker = SessionTracker::new();
        let t0 = MonotonicInstant::now();
        tracker.open("com.example.game".into(), curfew_util::now(), t0);

        let s1 = tracker.rollover(t0 + Duration::from_secs(5)).unwrap();
        let s2 = tracker.rollover(t0 + Duration::from_secs(12)).unwrap();
        let closed = tracker.close(t0 + Duration::from_secs(13)).unwrap();

        assert_eq!(s1.elapsed, Duration::from_secs(5));
        assert_eq!(s2.elapsed, Duration::from_secs(7));
        assert_eq!(closed.elapsed, Duration::from_secs(1));
        assert_eq!(closed.duration, Duration::from_secs(13));
        assert!(tracker.current().is_none());
    }

    #[test]
    fn opening_closes_previous() {
        let mut tracker = SessionTracker::new();
        let t0 = MonotonicInstant::now();

        let (_, previous) = tracker.open("com.a".into(), curfew_util::now(), t0);
        assert!(previous.is_none());

        let (_, previous) =
            tracker.open("com.b".into(), curfew_util::now(), t0 + Duration::from_secs(3));
        let previous = previous.unwrap();
        assert_eq!(previous.package, PackageId::new("com.a"));
        assert_eq!(previous.elapsed, Duration::from_secs(3));
        assert_eq!(tracker.current(), Some(&PackageId::new("com.b")));
    }

    #[test]
    fn nothing_to_roll_without_session() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.rollover(MonotonicInstant::now()).is_none());
        assert!(tracker.close(MonotonicInstant::now()).is_none());
    }

    #[test]
    fn backwards_instant_yields_zero() {
        let mut tracker = SessionTracker::new();
        let t0 = MonotonicInstant::now();
        tracker.open("com.a".into(), curfew_util::now(), t0 + Duration::from_secs(10));

        let slice = tracker.rollover(t0).unwrap();
        assert_eq!(slice.elapsed, Duration::ZERO);
    }
}
