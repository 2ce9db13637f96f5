//! Market calendars: exchange time zone, regular session hours and holidays
//!
//! Three calendars cover the supported instruments:
//! - `equity_us`: NYSE/Nasdaq, America/New_York, 09:30-16:00, full-day holidays
//! - `crypto`: UTC, trades around the clock every day
//! - `forex`: UTC, 24h Monday-Friday
//!
//! Early closes are treated as full sessions.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::Ticker;

/// Quote currencies that mark a `BASE-QUOTE` symbol as a crypto pair
const CRYPTO_QUOTES: &[&str] = &["USD", "USDT", "USDC", "EUR", "GBP", "BTC", "ETH"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarKind {
    #[default]
    EquityUs,
    Crypto,
    Forex,
}

impl CalendarKind {
    /// Pick the calendar from the symbol shape: `BTC-USD` is a crypto pair,
    /// `EURUSD=X` a forex pair, anything else a US-listed security.
    pub fn infer(ticker: &Ticker) -> Self {
        let symbol = ticker.as_str();
        if symbol.ends_with("=X") {
            return CalendarKind::Forex;
        }
        match symbol.rsplit_once('-') {
            Some((base, quote)) if !base.is_empty() && CRYPTO_QUOTES.contains(&quote) => {
                CalendarKind::Crypto
            }
            _ => CalendarKind::EquityUs,
        }
    }
}

impl std::fmt::Display for CalendarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarKind::EquityUs => write!(f, "equity_us"),
            CalendarKind::Crypto => write!(f, "crypto"),
            CalendarKind::Forex => write!(f, "forex"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketCalendar {
    kind: CalendarKind,
    tz: Tz,
    /// `None` means the session spans the whole calendar day
    hours: Option<(NaiveTime, NaiveTime)>,
}

impl MarketCalendar {
    pub fn new(kind: CalendarKind) -> Self {
        match kind {
            CalendarKind::EquityUs => MarketCalendar {
                kind,
                tz: chrono_tz::America::New_York,
                hours: NaiveTime::from_hms_opt(9, 30, 0).zip(NaiveTime::from_hms_opt(16, 0, 0)),
            },
            CalendarKind::Crypto | CalendarKind::Forex => MarketCalendar {
                kind,
                tz: chrono_tz::UTC,
                hours: None,
            },
        }
    }

    pub fn for_ticker(ticker: &Ticker) -> Self {
        Self::new(CalendarKind::infer(ticker))
    }

    pub fn kind(&self) -> CalendarKind {
        self.kind
    }

    /// Calendar date in the exchange time zone at instant `now`
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        match self.kind {
            CalendarKind::EquityUs => nyse_holidays(date.year()).contains(&date),
            CalendarKind::Crypto => false,
            CalendarKind::Forex => date.month() == 1 && date.day() == 1,
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        match self.kind {
            CalendarKind::Crypto => true,
            CalendarKind::EquityUs | CalendarKind::Forex => !weekend && !self.is_holiday(date),
        }
    }

    /// Regular session for `date` as UTC instants (open inclusive, close exclusive)
    pub fn session(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !self.is_trading_day(date) {
            return None;
        }
        let (open, close) = match self.hours {
            Some((open, close)) => (date.and_time(open), date.and_time(close)),
            None => {
                let midnight = date.and_time(NaiveTime::MIN);
                (midnight, midnight + Duration::days(1))
            }
        };
        let open = self.tz.from_local_datetime(&open).earliest()?;
        let close = self.tz.from_local_datetime(&close).earliest()?;
        Some((open.with_timezone(&Utc), close.with_timezone(&Utc)))
    }

    /// Whether the regular session of `date` is in progress at `now`
    pub fn is_session_open(&self, date: NaiveDate, now: DateTime<Utc>) -> bool {
        self.session(date)
            .is_some_and(|(open, close)| now >= open && now < close)
    }
}

/// Gregorian Easter Sunday (anonymous algorithm)
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// Saturday holidays move to Friday, Sunday holidays to Monday
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut day = first_next.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

/// NYSE full-day closures for `year`
pub fn nyse_holidays(year: i32) -> Vec<NaiveDate> {
    let ymd = |m: u32, d: u32| NaiveDate::from_ymd_opt(year, m, d);
    let nth = |m: u32, w: Weekday, n: u8| NaiveDate::from_weekday_of_month_opt(year, m, w, n);

    let mut days = Vec::with_capacity(10);

    // New Year's Day falling on Saturday is not observed on the prior Friday.
    if let Some(new_year) = ymd(1, 1) {
        match new_year.weekday() {
            Weekday::Sat => {}
            _ => days.push(observed(new_year)),
        }
    }
    days.extend(nth(1, Weekday::Mon, 3));
    days.extend(nth(2, Weekday::Mon, 3));
    days.extend(easter_sunday(year).map(|easter| easter - Duration::days(2)));
    days.extend(last_weekday_of_month(year, 5, Weekday::Mon));
    if year >= 2022 {
        days.extend(ymd(6, 19).map(observed));
    }
    days.extend(ymd(7, 4).map(observed));
    days.extend(nth(9, Weekday::Mon, 1));
    days.extend(nth(11, Weekday::Thu, 4));
    days.extend(ymd(12, 25).map(observed));

    days
}
