//! # Calendar and Clock Values
//!
//! Text and integer forms shared by the temporal field types. Calendar math
//! is delegated to `chrono`; this module only defines the SQL surface
//! formats:
//!
//! | Form      | Text                              | Integer          |
//! |-----------|-----------------------------------|------------------|
//! | DATE      | `YYYY-MM-DD`                      | `YYYYMMDD`       |
//! | DATETIME  | `YYYY-MM-DD HH:MM:SS[.ffffff]`    | `YYYYMMDDHHMMSS` |
//! | TIME      | `[-]HHH:MM:SS[.ffffff]`           | `[-]HHMMSS`      |
//!
//! A `T` separator is accepted between the date and clock parts, and a
//! bare date is read as midnight. TIME values are signed durations limited
//! to `TIME_MAX_SECONDS` (838:59:59), not clock readings.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

use crate::config::TIME_MAX_SECONDS;

const YEAR_MAX: i64 = 9999;
const TIME_MAX_HOURS: i64 = TIME_MAX_SECONDS / 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TemporalError {
    #[error("malformed temporal value")]
    BadFormat,
    #[error("temporal value out of range")]
    OutOfRange,
}

/// A signed duration with microsecond precision, as stored by TIME.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    pub seconds: i64,
    pub micros: u32,
}

impl Duration {
    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds, micros: 0 }
    }
}

pub fn parse_date(text: &str) -> Result<NaiveDate, TemporalError> {
    let s = text.trim();
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let n: i64 = s.parse().map_err(|_| TemporalError::BadFormat)?;
        return date_from_number(n);
    }

    let mut parts = s.splitn(3, '-');
    let year = next_number(&mut parts)?;
    let month = next_number(&mut parts)?;
    let day = next_number(&mut parts)?;
    if year > YEAR_MAX {
        return Err(TemporalError::OutOfRange);
    }
    let month = u32::try_from(month).map_err(|_| TemporalError::BadFormat)?;
    let day = u32::try_from(day).map_err(|_| TemporalError::BadFormat)?;
    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or(TemporalError::BadFormat)
}

/// Parses a datetime. Fractional seconds are returned separately so callers
/// without microsecond storage can decide how to treat them.
pub fn parse_datetime(text: &str) -> Result<(NaiveDateTime, u32), TemporalError> {
    let s = text.trim();
    if s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()) {
        let n: i64 = s.parse().map_err(|_| TemporalError::BadFormat)?;
        return Ok((datetime_from_number(n)?, 0));
    }

    let split = s.find(|c: char| c == 'T' || c == ' ');
    let (date_text, clock_text) = match split {
        Some(idx) => (&s[..idx], s[idx + 1..].trim()),
        None => (s, ""),
    };
    let date = parse_date(date_text)?;
    if clock_text.is_empty() {
        return Ok((date.and_time(NaiveTime::MIN), 0));
    }

    let clock = parse_time(clock_text)?;
    if clock.seconds < 0 || clock.seconds >= 86_400 {
        return Err(TemporalError::BadFormat);
    }
    let time = NaiveTime::from_num_seconds_from_midnight_opt(clock.seconds as u32, 0)
        .ok_or(TemporalError::BadFormat)?;
    Ok((date.and_time(time), clock.micros))
}

/// Parses `[-]H+:MM:SS[.ffffff]`, `[-]HH:MM` or `[-]HHMMSS`.
pub fn parse_time(text: &str) -> Result<Duration, TemporalError> {
    let s = text.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let (clock, frac) = match body.find('.') {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    let seconds = if clock.contains(':') {
        let parts: Vec<&str> = clock.split(':').collect();
        let numbers = parts
            .iter()
            .map(|p| p.parse::<i64>().map_err(|_| TemporalError::BadFormat))
            .collect::<Result<Vec<_>, _>>()?;
        let (h, m, sec) = match numbers.as_slice() {
            [h, m, sec] => (*h, *m, *sec),
            [h, m] => (*h, *m, 0),
            _ => return Err(TemporalError::BadFormat),
        };
        if h < 0 || !(0..=59).contains(&m) || !(0..=59).contains(&sec) {
            return Err(TemporalError::BadFormat);
        }
        if h > TIME_MAX_HOURS {
            return Err(TemporalError::OutOfRange);
        }
        h * 3600 + m * 60 + sec
    } else {
        let n: i64 = clock.parse().map_err(|_| TemporalError::BadFormat)?;
        hhmmss_to_seconds(n)?
    };

    let micros = match frac {
        Some(digits) => parse_micros(digits)?,
        None => 0,
    };
    if seconds > TIME_MAX_SECONDS {
        return Err(TemporalError::OutOfRange);
    }
    Ok(Duration {
        seconds: if negative { -seconds } else { seconds },
        micros,
    })
}

/// Reads up to six fraction digits; further digits are ignored.
fn parse_micros(digits: &str) -> Result<u32, TemporalError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TemporalError::BadFormat);
    }
    let padded = format!("{:0<6}", digits);
    padded[..6].parse().map_err(|_| TemporalError::BadFormat)
}

fn next_number<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<i64, TemporalError> {
    let part = parts.next().ok_or(TemporalError::BadFormat)?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TemporalError::BadFormat);
    }
    part.parse().map_err(|_| TemporalError::BadFormat)
}

fn hhmmss_to_seconds(n: i64) -> Result<i64, TemporalError> {
    if n < 0 {
        return Err(TemporalError::BadFormat);
    }
    let (h, m, s) = (n / 10_000, (n / 100) % 100, n % 100);
    if m > 59 || s > 59 {
        return Err(TemporalError::BadFormat);
    }
    if h > TIME_MAX_HOURS {
        return Err(TemporalError::OutOfRange);
    }
    Ok(h * 3600 + m * 60 + s)
}

pub fn date_from_number(n: i64) -> Result<NaiveDate, TemporalError> {
    if !(0..=99_991_231).contains(&n) {
        return Err(TemporalError::OutOfRange);
    }
    let (y, m, d) = (n / 10_000, (n / 100) % 100, n % 100);
    NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32).ok_or(TemporalError::BadFormat)
}

/// Accepts `YYYYMMDDHHMMSS` or a bare `YYYYMMDD`.
pub fn datetime_from_number(n: i64) -> Result<NaiveDateTime, TemporalError> {
    if n < 0 {
        return Err(TemporalError::OutOfRange);
    }
    if n <= 99_991_231 {
        return Ok(date_from_number(n)?.and_time(NaiveTime::MIN));
    }
    let date = date_from_number(n / 1_000_000)?;
    let clock = n % 1_000_000;
    let (h, m, s) = (clock / 10_000, (clock / 100) % 100, clock % 100);
    let time = NaiveTime::from_hms_opt(h as u32, m as u32, s as u32).ok_or(TemporalError::BadFormat)?;
    Ok(date.and_time(time))
}

pub fn time_from_number(n: i64) -> Result<Duration, TemporalError> {
    let magnitude = i64::try_from(n.unsigned_abs()).map_err(|_| TemporalError::OutOfRange)?;
    let seconds = hhmmss_to_seconds(magnitude)?;
    if seconds > TIME_MAX_SECONDS {
        return Err(TemporalError::OutOfRange);
    }
    Ok(Duration::from_seconds(if n < 0 { -seconds } else { seconds }))
}

pub fn date_to_number(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

pub fn datetime_to_number(dt: NaiveDateTime) -> i64 {
    date_to_number(dt.date()) * 1_000_000
        + dt.hour() as i64 * 10_000
        + dt.minute() as i64 * 100
        + dt.second() as i64
}

pub fn time_to_number(seconds: i64) -> i64 {
    let abs = seconds.abs();
    let n = (abs / 3600) * 10_000 + ((abs / 60) % 60) * 100 + abs % 60;
    if seconds < 0 {
        -n
    } else {
        n
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_datetime(dt: NaiveDateTime, micros: Option<u32>) -> String {
    let base = dt.format("%Y-%m-%d %H:%M:%S").to_string();
    match micros {
        Some(us) => format!("{}.{:06}", base, us),
        None => base,
    }
}

pub fn format_time(value: Duration, with_micros: bool) -> String {
    let abs = value.seconds.abs();
    let sign = if value.seconds < 0 { "-" } else { "" };
    let base = format!("{}{:02}:{:02}:{:02}", sign, abs / 3600, (abs / 60) % 60, abs % 60);
    if with_micros {
        format!("{}.{:06}", base, value.micros)
    } else {
        base
    }
}

/// Seconds since 1970-01-01 00:00:00 UTC, negative before it.
pub fn seconds_since_epoch(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp()
}

pub fn datetime_from_epoch(seconds: i64) -> Result<NaiveDateTime, TemporalError> {
    DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.naive_utc())
        .ok_or(TemporalError::OutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_both_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(parse_date("2024-02-29").unwrap(), expected);
        assert_eq!(parse_date("20240229").unwrap(), expected);
        assert_eq!(parse_date("2023-02-29"), Err(TemporalError::BadFormat));
        assert_eq!(parse_date("2024-1"), Err(TemporalError::BadFormat));
    }

    #[test]
    fn parse_datetime_with_fraction_and_separator() {
        let (dt, us) = parse_datetime("2024-01-15T13:45:30.25").unwrap();
        assert_eq!(datetime_to_number(dt), 20240115134530);
        assert_eq!(us, 250_000);

        let (dt, us) = parse_datetime("2024-01-15").unwrap();
        assert_eq!(datetime_to_number(dt), 20240115000000);
        assert_eq!(us, 0);

        assert!(parse_datetime("2024-01-15 24:00:00").is_err());
    }

    #[test]
    fn parse_time_allows_long_durations() {
        assert_eq!(parse_time("838:59:59").unwrap().seconds, TIME_MAX_SECONDS);
        assert_eq!(parse_time("-01:00:00").unwrap().seconds, -3600);
        assert_eq!(parse_time("12:30").unwrap().seconds, 45_000);
        assert_eq!(parse_time("839:00:00"), Err(TemporalError::OutOfRange));
        assert_eq!(parse_time("10:61:00"), Err(TemporalError::BadFormat));
    }

    #[test]
    fn integer_forms() {
        let dt = datetime_from_number(19991231235959).unwrap();
        assert_eq!(format_datetime(dt, None), "1999-12-31 23:59:59");
        assert_eq!(datetime_from_number(19991231).unwrap().hour(), 0);
        assert_eq!(time_from_number(-123456).unwrap().seconds, -(12 * 3600 + 34 * 60 + 56));
        assert_eq!(time_to_number(-(12 * 3600 + 34 * 60 + 56)), -123456);
        assert!(date_from_number(20241301).is_err());
    }

    #[test]
    fn oversized_components_are_out_of_range() {
        assert_eq!(parse_date("99999-01-01"), Err(TemporalError::OutOfRange));
        assert_eq!(parse_date("4294969320-01-01"), Err(TemporalError::OutOfRange));
        assert_eq!(parse_date("2024-4294967297-01"), Err(TemporalError::BadFormat));
        assert_eq!(parse_date("9999-12-31").unwrap().year(), 9999);
        assert_eq!(
            parse_datetime("4294969320-01-01 00:00:00"),
            Err(TemporalError::OutOfRange)
        );

        assert_eq!(parse_time("99999999999999999:00:00"), Err(TemporalError::OutOfRange));
        assert_eq!(parse_time("-99999999999999999:00"), Err(TemporalError::OutOfRange));
        assert_eq!(parse_time("--9223372036854775808:00:00"), Err(TemporalError::BadFormat));
        assert_eq!(parse_time("9223372036854775807"), Err(TemporalError::OutOfRange));
        assert_eq!(parse_time("99999999999999999999:00:00"), Err(TemporalError::BadFormat));
    }

    #[test]
    fn integer_extremes_do_not_wrap() {
        assert_eq!(time_from_number(i64::MIN), Err(TemporalError::OutOfRange));
        assert_eq!(time_from_number(i64::MAX), Err(TemporalError::OutOfRange));
        assert_eq!(time_from_number(-8_385_959).unwrap().seconds, -TIME_MAX_SECONDS);
        assert_eq!(time_from_number(8_390_000), Err(TemporalError::OutOfRange));
        assert_eq!(date_from_number(i64::MIN), Err(TemporalError::OutOfRange));
        assert_eq!(datetime_from_number(i64::MIN), Err(TemporalError::OutOfRange));
        assert_eq!(datetime_from_number(i64::MAX), Err(TemporalError::OutOfRange));
    }

    #[test]
    fn formatting() {
        let t = Duration {
            seconds: -(100 * 3600 + 5),
            micros: 42,
        };
        assert_eq!(format_time(t, false), "-100:00:05");
        assert_eq!(format_time(t, true), "-100:00:05.000042");
        let d = NaiveDate::from_ymd_opt(987, 3, 4).unwrap();
        assert_eq!(format_date(d), "0987-03-04");
    }

    #[test]
    fn epoch_seconds_are_signed() {
        let (dt, _) = parse_datetime("1969-12-31 23:59:59").unwrap();
        assert_eq!(seconds_since_epoch(dt), -1);
        let back = datetime_from_epoch(86_400).unwrap();
        assert_eq!(format_datetime(back, None), "1970-01-02 00:00:00");
    }
}
