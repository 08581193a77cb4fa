use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use std::collections::HashSet;

// US Eastern standard time. DST is ignored; the close cutoff below leaves
// enough slack for the hour of drift.
const ET_OFFSET_SECS: i32 = -5 * 3600;

// Before this time (ET) the current session's bar is not final yet.
const CLOSE_CUTOFF_HOUR_ET: u32 = 17;
const CLOSE_CUTOFF_MINUTE_ET: u32 = 0;

// Years covered by the built-in NYSE holiday rules.
const FIRST_HOLIDAY_YEAR: i32 = 2000;
const LAST_HOLIDAY_YEAR: i32 = 2040;

/// Weekends plus a holiday set. The regular NYSE holidays are built in;
/// one-off closures come from US_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    holidays: HashSet<NaiveDate>,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        let holidays = (FIRST_HOLIDAY_YEAR..=LAST_HOLIDAY_YEAR)
            .flat_map(nyse_holidays)
            .collect();
        Self { holidays }
    }
}

impl MarketCalendar {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Ok(s) = std::env::var("US_MARKET_HOLIDAYS") {
            out.extend_from_list(&s);
        }
        out
    }

    pub fn extend_from_list(&mut self, list: &str) {
        for part in list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                Ok(d) => {
                    self.holidays.insert(d);
                }
                Err(err) => tracing::warn!(value = part, error = %err, "ignoring bad holiday date"),
            }
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.holidays.contains(&date)
    }

    /// The `n` trading days strictly after `after`, in order.
    pub fn next_trading_days(&self, after: NaiveDate, n: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(n);
        let mut date = after;
        while out.len() < n {
            date = date + Duration::days(1);
            if self.is_trading_day(date) {
                out.push(date);
            }
        }
        out
    }

    /// Latest session whose daily bar should be final at `now_utc`.
    pub fn resolve_as_of_date(
        &self,
        as_of_date_arg: Option<&str>,
        now_utc: DateTime<Utc>,
    ) -> anyhow::Result<NaiveDate> {
        if let Some(s) = as_of_date_arg {
            return Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?);
        }

        let mut date = today_et(now_utc)?;
        let now_et = now_utc.with_timezone(&et_offset()?);
        let cutoff_reached =
            (now_et.hour(), now_et.minute()) >= (CLOSE_CUTOFF_HOUR_ET, CLOSE_CUTOFF_MINUTE_ET);
        if !cutoff_reached {
            date = date - Duration::days(1);
        }

        while !self.is_trading_day(date) {
            date = date - Duration::days(1);
        }
        Ok(date)
    }
}

pub fn today_et(now_utc: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    session_date(now_utc)
}

/// Calendar date in ET of an instant, e.g. a session-open timestamp.
pub fn session_date(ts: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    Ok(ts.with_timezone(&et_offset()?).date_naive())
}

fn et_offset() -> anyhow::Result<chrono::FixedOffset> {
    chrono::FixedOffset::east_opt(ET_OFFSET_SECS).context("invalid ET offset")
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Regular NYSE full-day closures for `year`, observed dates applied.
pub fn nyse_holidays(year: i32) -> Vec<NaiveDate> {
    let fixed = |m: u32, d: u32| NaiveDate::from_ymd_opt(year, m, d);
    let nth = |m: u32, wd: Weekday, n: u8| NaiveDate::from_weekday_of_month_opt(year, m, wd, n);

    let mut out: Vec<NaiveDate> = Vec::with_capacity(10);
    // A Saturday New Year's Day is not made up on the Friday before.
    if let Some(d) = fixed(1, 1) {
        match d.weekday() {
            Weekday::Sat => {}
            Weekday::Sun => out.push(d + Duration::days(1)),
            _ => out.push(d),
        }
    }
    out.extend(nth(1, Weekday::Mon, 3));
    out.extend(nth(2, Weekday::Mon, 3));
    out.extend(easter_sunday(year).map(|e| e - Duration::days(2)));
    out.extend(last_weekday_of_month(year, 5, Weekday::Mon));
    if year >= 2022 {
        out.extend(fixed(6, 19).map(observed));
    }
    out.extend(fixed(7, 4).map(observed));
    out.extend(nth(9, Weekday::Mon, 1));
    out.extend(nth(11, Weekday::Thu, 4));
    out.extend(fixed(12, 25).map(observed));
    out
}

/// Saturday holidays close the Friday before, Sunday ones the Monday after.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn last_weekday_of_month(year: i32, month: u32, wd: Weekday) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, wd, 5)
        .or_else(|| NaiveDate::from_weekday_of_month_opt(year, month, wd, 4))
}

/// Gregorian Easter (anonymous computus).
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
