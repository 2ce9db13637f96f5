//! Labels the most recent bar as "today" or by its weekday name

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Serialize, Serializer};

use crate::calendar::MarketCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Weekday(Weekday),
}

impl DayLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayLabel::Today => "today",
            DayLabel::Weekday(day) => weekday_name(*day),
        }
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

impl std::fmt::Display for DayLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DayLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// "today" only while the session that produced `latest_bar_date` is in
/// progress at `now` (exchange time zone, holidays and weekends honoured);
/// otherwise the weekday of the bar.
pub fn label(latest_bar_date: NaiveDate, now: DateTime<Utc>, calendar: &MarketCalendar) -> DayLabel {
    let session_today = calendar.local_date(now) == latest_bar_date;
    if session_today && calendar.is_session_open(latest_bar_date, now) {
        DayLabel::Today
    } else {
        DayLabel::Weekday(latest_bar_date.weekday())
    }
}
