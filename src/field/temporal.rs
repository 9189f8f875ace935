//! Temporal images.
//!
//! Epoch and Microtime store seconds since 1970 (plus microseconds); Time
//! stores a signed duration; Date and DateTime store their integer forms
//! `YYYYMMDD` and `YYYYMMDDHHMMSS`. All are big-endian, so byte order is
//! chronological order. A zero Date/DateTime image is the "zero date".

use super::{FieldType, Status};
use crate::config::{EPOCH_MAX_SECONDS, EPOCH_MIN_SECONDS, TIME_MAX_SECONDS};
use crate::decimal::Decimal;
use crate::temporal::{
    date_from_number, date_to_number, datetime_from_epoch, datetime_from_number,
    datetime_to_number, format_date, format_datetime, format_time, parse_datetime, parse_time,
    seconds_since_epoch, time_from_number, time_to_number, Duration, TemporalError,
};

fn read_u64(image: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&image[..8]);
    u64::from_be_bytes(raw)
}

fn read_u32(image: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&image[at..at + 4]);
    u32::from_be_bytes(raw)
}

fn write_epoch(ft: &FieldType, image: &mut [u8], seconds: i64, micros: u32) -> Status {
    if !(EPOCH_MIN_SECONDS..=EPOCH_MAX_SECONDS).contains(&seconds) {
        image.fill(0);
        return Status::OutOfRange;
    }
    image[..8].copy_from_slice(&(seconds as u64).to_be_bytes());
    if matches!(ft, FieldType::Microtime) {
        image[8..12].copy_from_slice(&micros.to_be_bytes());
    }
    Status::Ok
}

fn write_time(image: &mut [u8], seconds: i64) -> Status {
    let clamped = seconds.clamp(-TIME_MAX_SECONDS, TIME_MAX_SECONDS);
    image[..4].copy_from_slice(&((clamped as i32 as u32) ^ 0x8000_0000).to_be_bytes());
    if clamped != seconds {
        Status::OutOfRange
    } else {
        Status::Ok
    }
}

fn read_time(image: &[u8]) -> i64 {
    (read_u32(image, 0) ^ 0x8000_0000) as i32 as i64
}

fn from_error(ft: &FieldType, image: &mut [u8], err: TemporalError) -> Status {
    match ft {
        FieldType::Time => {
            write_time(image, 0);
        }
        _ => image.fill(0),
    }
    match err {
        TemporalError::BadFormat => Status::Invalid,
        TemporalError::OutOfRange => Status::OutOfRange,
    }
}

pub(super) fn store_str(ft: &FieldType, image: &mut [u8], text: &str) -> Status {
    let outcome = match ft {
        FieldType::Time => parse_time(text).map(|d| {
            let status = write_time(image, d.seconds);
            if d.micros != 0 && status == Status::Ok {
                Status::Truncated
            } else {
                status
            }
        }),
        _ => parse_datetime(text).map(|(dt, micros)| store_datetime(ft, image, dt, micros)),
    };
    match outcome {
        Ok(status) => status,
        Err(err) => from_error(ft, image, err),
    }
}

fn store_datetime(
    ft: &FieldType,
    image: &mut [u8],
    dt: chrono::NaiveDateTime,
    micros: u32,
) -> Status {
    match ft {
        FieldType::Epoch | FieldType::Microtime => {
            write_epoch(ft, image, seconds_since_epoch(dt), micros)
        }
        FieldType::Date => {
            image[..4].copy_from_slice(&(date_to_number(dt.date()) as u32).to_be_bytes());
            if dt.time() != chrono::NaiveTime::MIN {
                Status::Truncated
            } else {
                Status::Ok
            }
        }
        FieldType::DateTime => {
            image[..8].copy_from_slice(&(datetime_to_number(dt) as u64).to_be_bytes());
            Status::Ok
        }
        _ => Status::Invalid,
    }
}

pub(super) fn store_int(ft: &FieldType, image: &mut [u8], v: i64) -> Status {
    let outcome = match ft {
        FieldType::Time => time_from_number(v).map(|d| write_time(image, d.seconds)),
        FieldType::Date => date_from_number(v).map(|d| {
            image[..4].copy_from_slice(&(date_to_number(d) as u32).to_be_bytes());
            Status::Ok
        }),
        _ => datetime_from_number(v).map(|dt| store_datetime(ft, image, dt, 0)),
    };
    match outcome {
        Ok(status) => status,
        Err(_) if v == 0 && matches!(ft, FieldType::Date | FieldType::DateTime) => {
            image.fill(0);
            Status::Ok
        }
        Err(err) => from_error(ft, image, err),
    }
}

pub(super) fn store_real(ft: &FieldType, image: &mut [u8], v: f64) -> Status {
    if !v.is_finite() {
        return from_error(ft, image, TemporalError::BadFormat);
    }
    let whole = v.trunc();
    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return from_error(ft, image, TemporalError::OutOfRange);
    }
    let micros = ((v - whole).abs() * 1_000_000.0).round() as u32;
    let status = store_int(ft, image, whole as i64);
    apply_micros(ft, image, status, micros.min(999_999))
}

pub(super) fn store_decimal(ft: &FieldType, image: &mut [u8], v: &Decimal) -> Status {
    let whole = v.truncate(0);
    let n = match whole.to_i64() {
        Ok(n) => n,
        Err(_) => return from_error(ft, image, TemporalError::OutOfRange),
    };
    let frac = v.sub(&whole).unwrap_or_default().abs();
    let micros = frac
        .mul(&Decimal::from_i64(1_000_000))
        .ok()
        .and_then(|us| us.to_i64().ok())
        .unwrap_or(0)
        .clamp(0, 999_999) as u32;
    let status = store_int(ft, image, n);
    apply_micros(ft, image, status, micros)
}

fn apply_micros(ft: &FieldType, image: &mut [u8], status: Status, micros: u32) -> Status {
    if status != Status::Ok || micros == 0 {
        return status;
    }
    match ft {
        FieldType::Microtime => {
            image[8..12].copy_from_slice(&micros.to_be_bytes());
            Status::Ok
        }
        _ => Status::Truncated,
    }
}

pub(super) fn val_int(ft: &FieldType, image: &[u8]) -> i64 {
    match ft {
        FieldType::Epoch | FieldType::Microtime => {
            datetime_from_epoch(read_u64(image) as i64)
                .map(datetime_to_number)
                .unwrap_or(0)
        }
        FieldType::Time => time_to_number(read_time(image)),
        FieldType::Date => read_u32(image, 0) as i64,
        FieldType::DateTime => read_u64(image) as i64,
        _ => 0,
    }
}

fn micros_of(ft: &FieldType, image: &[u8]) -> u32 {
    match ft {
        FieldType::Microtime => read_u32(image, 8),
        _ => 0,
    }
}

pub(super) fn val_str(ft: &FieldType, image: &[u8]) -> String {
    match ft {
        FieldType::Epoch | FieldType::Microtime => {
            let micros = matches!(ft, FieldType::Microtime).then(|| micros_of(ft, image));
            match datetime_from_epoch(read_u64(image) as i64) {
                Ok(dt) => format_datetime(dt, micros),
                Err(_) => "0000-00-00 00:00:00".to_string(),
            }
        }
        FieldType::Time => format_time(Duration::from_seconds(read_time(image)), false),
        FieldType::Date => match date_from_number(read_u32(image, 0) as i64) {
            Ok(d) => format_date(d),
            Err(_) => "0000-00-00".to_string(),
        },
        FieldType::DateTime => match datetime_from_number(read_u64(image) as i64) {
            Ok(dt) => format_datetime(dt, None),
            Err(_) => "0000-00-00 00:00:00".to_string(),
        },
        _ => String::new(),
    }
}

pub(super) fn val_decimal(ft: &FieldType, image: &[u8]) -> Decimal {
    let whole = Decimal::from_i64(val_int(ft, image));
    match ft {
        FieldType::Microtime => {
            let text = format!("{}.{:06}", whole, micros_of(ft, image));
            Decimal::parse(&text).unwrap_or(whole)
        }
        _ => whole,
    }
}

pub(super) fn get_timestamp(ft: &FieldType, image: &[u8]) -> Option<i64> {
    match ft {
        FieldType::Epoch | FieldType::Microtime => Some(read_u64(image) as i64),
        FieldType::Time => Some(read_time(image)),
        FieldType::Date => date_from_number(read_u32(image, 0) as i64)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(seconds_since_epoch),
        FieldType::DateTime => datetime_from_number(read_u64(image) as i64)
            .ok()
            .map(seconds_since_epoch),
        _ => None,
    }
}
