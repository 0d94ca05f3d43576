//! Calendar-day rollover detection

use chrono::{DateTime, Local, NaiveDate};
use curfew_util::calendar_day;

/// Tracks the last day usage was reset.
///
/// Only calendar dates are compared, never elapsed-time counters. A date that
/// moves backwards (clock set to yesterday) does not trigger a reset.
#[derive(Debug, Clone, Copy)]
pub struct DailyReset {
    last_reset: Option<NaiveDate>,
}

impl DailyReset {
    pub fn new(last_reset: Option<NaiveDate>) -> Self {
        Self { last_reset }
    }

    pub fn last_reset(&self) -> Option<NaiveDate> {
        self.last_reset
    }

    /// The day to reset to, if `now` is on a later day than the last reset
    pub fn due(&self, now: &DateTime<Local>) -> Option<NaiveDate> {
        let today = calendar_day(now);
        match self.last_reset {
            Some(last) if today <= last => None,
            _ => Some(today),
        }
    }

    pub fn commit(&mut self, day: NaiveDate) {
        self.last_reset = Some(day);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
    }

    #[test]
    fn first_run_is_due() {
        let reset = DailyReset::new(None);
        assert_eq!(reset.due(&at(1, 9)), Some(calendar_day(&at(1, 9))));
    }

    #[test]
    fn idempotent_within_a_day() {
        let mut reset = DailyReset::new(None);
        let day = reset.due(&at(1, 9)).unwrap();
        reset.commit(day);

        assert_eq!(reset.due(&at(1, 9)), None);
        assert_eq!(reset.due(&at(1, 23)), None);
        assert_eq!(reset.due(&at(2, 0)), Some(calendar_day(&at(2, 0))));
    }

    #[test]
    fn clock_set_back_does_not_reset() {
        let mut reset = DailyReset::new(None);
        reset.commit(calendar_day(&at(5, 12)));

        assert_eq!(reset.due(&at(4, 12)), None);
    }
}
