//! Time utilities for curfewd
//!
//! Provides both monotonic time (for usage accrual and wallet spending) and
//! wall-clock time (for calendar-day bookkeeping).
//!
//! Session durations are always measured on the monotonic clock so that a
//! wall-clock jump cannot mint or erase usage. The wall clock is only used to
//! decide *which calendar day* it is.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `CURFEW_MOCK_TIME` environment variable can be set
//! to override the wall-clock time. This is useful for exercising the daily
//! reset without waiting for midnight.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 23:59:30`)
//!
//! Example:
//! ```bash
//! CURFEW_MOCK_TIME="2025-12-25 23:59:30" cargo run --bin curfewd
//! ```

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "CURFEW_MOCK_TIME";

/// Format used for persisted calendar-day keys
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Format accepted in `CURFEW_MOCK_TIME`
const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between the mock start time and the real time at first use, so
/// mock time keeps advancing
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn parse_mock_time(value: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(value, MOCK_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

#[allow(clippy::disallowed_methods)] // wraps Local::now()
fn mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        if !cfg!(debug_assertions) {
            return None;
        }
        let value = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
        let Some(mock) = parse_mock_time(&value) else {
            tracing::warn!(
                mock_time = %value,
                expected_format = MOCK_TIME_FORMAT,
                "Ignoring unusable mock time"
            );
            return None;
        };
        let offset = mock.signed_duration_since(chrono::Local::now());
        tracing::info!(
            mock_time = %value,
            offset_secs = offset.num_seconds(),
            "Mock time enabled"
        );
        Some(offset)
    })
}

/// Whether `CURFEW_MOCK_TIME` is shifting the wall clock
pub fn is_mock_time_active() -> bool {
    mock_time_offset().is_some()
}

/// Current local time, shifted by mock time in debug builds
#[allow(clippy::disallowed_methods)] // wraps Local::now()
pub fn now() -> DateTime<Local> {
    let real = chrono::Local::now();
    mock_time_offset().map_or(real, |offset| real + offset)
}

/// Calendar day of a wall-clock instant, in local time
pub fn calendar_day(dt: &DateTime<Local>) -> NaiveDate {
    dt.date_naive()
}

/// Whether two wall-clock instants fall on the same local calendar day.
///
/// This is what a cached "blocked today" marker is checked against; elapsed
/// millisecond counters are never used for day boundaries.
pub fn is_same_calendar_day(a: &DateTime<Local>, b: &DateTime<Local>) -> bool {
    calendar_day(a) == calendar_day(b)
}

/// Persisted string form of a calendar day
pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_KEY_FORMAT).to_string()
}

/// Parse a persisted calendar-day key
pub fn parse_day_key(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DAY_KEY_FORMAT).ok()
}

/// Represents a point in monotonic time for usage accrual.
/// This is immune to wall-clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Instant);

impl MonotonicInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Duration since `earlier`, or zero if `earlier` is actually later
    pub fn duration_since(&self, earlier: MonotonicInstant) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub fn checked_add(&self, duration: Duration) -> Option<MonotonicInstant> {
        self.0.checked_add(duration).map(MonotonicInstant)
    }
}

impl std::ops::Add<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        MonotonicInstant(self.0 + rhs)
    }
}

/// Source of both clocks the engine needs.
///
/// The engine itself takes explicit timestamps; the daemon reads them from a
/// `Clock` so tests can substitute a controllable one.
pub trait Clock: Send + Sync {
    /// Wall-clock time (calendar bookkeeping only)
    fn now(&self) -> DateTime<Local>;

    /// Monotonic time (all duration arithmetic)
    fn now_mono(&self) -> MonotonicInstant;
}

/// The real clock, honoring `CURFEW_MOCK_TIME` in debug builds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        now()
    }

    fn now_mono(&self) -> MonotonicInstant {
        MonotonicInstant::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<(DateTime<Local>, MonotonicInstant)>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            inner: Mutex::new((start, MonotonicInstant::now())),
        }
    }

    /// Advance both clocks by the same amount
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.0 += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        inner.1 = inner.1 + by;
    }

    /// Move only the wall clock (simulates a user changing the device time)
    pub fn set_wall(&self, wall: DateTime<Local>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.0 = wall;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn now_mono(&self) -> MonotonicInstant {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_same_calendar_day() {
        let morning = Local.with_ymd_and_hms(2025, 12, 25, 8, 0, 0).unwrap();
        let evening = Local.with_ymd_and_hms(2025, 12, 25, 23, 59, 59).unwrap();
        let next_day = Local.with_ymd_and_hms(2025, 12, 26, 0, 0, 1).unwrap();

        assert!(is_same_calendar_day(&morning, &evening));
        assert!(!is_same_calendar_day(&evening, &next_day));
    }

    #[test]
    fn test_same_day_of_year_different_year() {
        let a = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let b = Local.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert!(!is_same_calendar_day(&a, &b));
    }

    #[test]
    fn test_day_key_roundtrip() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        assert_eq!(day_key(day), "2025-01-09");
        assert_eq!(parse_day_key("2025-01-09"), Some(day));
        assert_eq!(parse_day_key("09/01/2025"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_monotonic_instant() {
        let t1 = MonotonicInstant::now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = MonotonicInstant::now();

        assert!(t2 > t1);
        assert!(t2.duration_since(t1) >= Duration::from_millis(10));
    }

    #[test]
    fn test_monotonic_duration_since_saturates() {
        let t1 = MonotonicInstant::now();
        let t2 = t1 + Duration::from_secs(5);
        assert_eq!(t1.duration_since(t2), Duration::ZERO);
        assert_eq!(t2.duration_since(t1), Duration::from_secs(5));
    }

    #[test]
    fn test_manual_clock_advances_both() {
        let start = Local.with_ymd_and_hms(2025, 12, 25, 23, 59, 0).unwrap();
        let clock = ManualClock::new(start);
        let mono_start = clock.now_mono();

        clock.advance(Duration::from_secs(120));

        assert_eq!(clock.now().day(), 26);
        assert_eq!(
            clock.now_mono().duration_since(mono_start),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_manual_clock_wall_jump_leaves_mono() {
        let start = Local.with_ymd_and_hms(2025, 12, 25, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let mono_start = clock.now_mono();

        clock.set_wall(start - chrono::Duration::hours(5));

        assert_eq!(clock.now_mono(), mono_start);
        assert_eq!(clock.now().format("%H").to_string(), "07");
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn test_parse_mock_time() {
        let parsed = parse_mock_time("2025-12-25 14:30:00").unwrap();
        assert_eq!(parsed.day(), 25);
        assert_eq!(parsed.hour(), 14);

        for bad in ["2025-12-25", "2025-12-25T14:30:00", "", "not a date"] {
            assert!(parse_mock_time(bad).is_none());
        }
    }
}
