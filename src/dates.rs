use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::fmt;

pub const TOGGL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive range of calendar days, as Toggl's report API takes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateRange {
    pub fn new(since: NaiveDate, until: NaiveDate) -> Self {
        Self { since, until }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    /// Yesterday, or the Friday before when today is Monday or the weekend.
    pub fn last_business_day(today: NaiveDate) -> Self {
        let mut day = today - Days::new(1);
        while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            day = day - Days::new(1);
        }
        Self::single(day)
    }

    pub fn last_month(today: NaiveDate) -> Self {
        let this_month = today.with_day(1).unwrap_or(today);
        let since = this_month - Months::new(1);
        let until = this_month - Days::new(1);
        Self::new(since, until)
    }

    /// The `days` days up to and including today.
    pub fn last_days(today: NaiveDate, days: u64) -> Self {
        Self::new(today - Days::new(days.saturating_sub(1)), today)
    }

    pub fn since_param(&self) -> String {
        self.since.format(TOGGL_DATE_FORMAT).to_string()
    }

    pub fn until_param(&self) -> String {
        self.until.format(TOGGL_DATE_FORMAT).to_string()
    }

    /// Midnight starting `since` in `timezone`, as a UTC instant.
    pub fn start_utc(&self, timezone: Tz) -> DateTime<Utc> {
        local_midnight(self.since, timezone)
    }

    /// Midnight after `until` in `timezone`, as a UTC instant. Exclusive.
    pub fn end_utc(&self, timezone: Tz) -> DateTime<Utc> {
        local_midnight(self.until + Days::new(1), timezone)
    }
}

/// The calendar day it is now in `timezone`.
pub fn today(timezone: Tz) -> NaiveDate {
    Utc::now().with_timezone(&timezone).date_naive()
}

fn local_midnight(day: NaiveDate, timezone: Tz) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    // Zones that skip midnight for DST start the day an hour later.
    timezone
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| timezone.from_local_datetime(&(midnight + TimeDelta::hours(1))).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.since == self.until {
            write!(f, "{}", self.since_param())
        } else {
            write!(f, "{} - {}", self.since_param(), self.until_param())
        }
    }
}

pub fn parse_toggl_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value, TOGGL_DATE_FORMAT)
}
