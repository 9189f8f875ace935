//! Boolean, integer, double and decimal images.
//!
//! Integers are stored big-endian with the sign bit flipped. Doubles use the
//! usual order-preserving transform: negative values have every bit
//! inverted, non-negative values have only the sign bit set. Negative zero
//! is stored as zero so the two compare equal.

use super::{FieldType, Status};
use crate::decimal::{Decimal, DecimalError, Fit};

const TRUE_WORDS: [&str; 4] = ["y", "t", "true", "yes"];
const FALSE_WORDS: [&str; 4] = ["n", "f", "false", "no"];

fn encode_i32(image: &mut [u8], v: i32) {
    image[..4].copy_from_slice(&((v as u32) ^ 0x8000_0000).to_be_bytes());
}

fn decode_i32(image: &[u8]) -> i32 {
    let raw = u32::from_be_bytes([image[0], image[1], image[2], image[3]]);
    (raw ^ 0x8000_0000) as i32
}

fn encode_i64(image: &mut [u8], v: i64) {
    image[..8].copy_from_slice(&((v as u64) ^ (1 << 63)).to_be_bytes());
}

fn decode_i64(image: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&image[..8]);
    (u64::from_be_bytes(raw) ^ (1 << 63)) as i64
}

pub(crate) fn encode_f64(image: &mut [u8], v: f64) {
    let v = if v == 0.0 { 0.0 } else { v };
    let bits = v.to_bits();
    let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
    image[..8].copy_from_slice(&ordered.to_be_bytes());
}

fn decode_f64(image: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&image[..8]);
    let ordered = u64::from_be_bytes(raw);
    let bits = if ordered >> 63 == 1 {
        ordered ^ (1 << 63)
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

fn int_range(ft: &FieldType) -> (i64, i64) {
    match ft {
        FieldType::Int32 => (i32::MIN as i64, i32::MAX as i64),
        _ => (i64::MIN, i64::MAX),
    }
}

fn write_int(ft: &FieldType, image: &mut [u8], v: i64) {
    match ft {
        FieldType::Int32 => encode_i32(image, v as i32),
        _ => encode_i64(image, v),
    }
}

/// Stores an integer clamped to the column's range.
fn store_clamped(ft: &FieldType, image: &mut [u8], v: i64) -> Status {
    let (lo, hi) = int_range(ft);
    write_int(ft, image, v.clamp(lo, hi));
    if v < lo || v > hi {
        Status::OutOfRange
    } else {
        Status::Ok
    }
}

fn store_decimal_value(ft: &FieldType, image: &mut [u8], v: &Decimal) -> Status {
    let (precision, scale) = match ft {
        FieldType::Decimal { precision, scale } => (*precision, *scale),
        _ => return Status::Invalid,
    };
    let (_, fit) = v.fit(precision, scale);
    v.to_bin(precision, scale, image);
    match fit {
        Fit::Exact => Status::Ok,
        Fit::Rounded => Status::Truncated,
        Fit::Clamped => Status::OutOfRange,
    }
}

pub(super) fn store_str(ft: &FieldType, image: &mut [u8], text: &str) -> Status {
    let trimmed = text.trim();
    match ft {
        FieldType::Boolean { .. } => {
            let lower = trimmed.to_ascii_lowercase();
            if TRUE_WORDS.contains(&lower.as_str()) {
                image[0] = 1;
                Status::Ok
            } else if FALSE_WORDS.contains(&lower.as_str()) {
                image[0] = 0;
                Status::Ok
            } else {
                image[0] = 0;
                Status::Invalid
            }
        }
        FieldType::Int32 | FieldType::Int64 => {
            if let Ok(v) = trimmed.parse::<i64>() {
                return store_clamped(ft, image, v);
            }
            match Decimal::parse(trimmed) {
                Ok(d) => {
                    let status = store_decimal(ft, image, &d);
                    if status == Status::Ok && d.round(0) != d {
                        Status::Truncated
                    } else {
                        status
                    }
                }
                Err(DecimalError::Overflow) => {
                    let (lo, hi) = int_range(ft);
                    write_int(ft, image, if trimmed.starts_with('-') { lo } else { hi });
                    Status::OutOfRange
                }
                Err(_) => {
                    write_int(ft, image, 0);
                    Status::Invalid
                }
            }
        }
        FieldType::Double => match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                encode_f64(image, v);
                Status::Ok
            }
            Ok(v) if v.is_infinite() => {
                encode_f64(image, if v > 0.0 { f64::MAX } else { f64::MIN });
                Status::OutOfRange
            }
            _ => {
                encode_f64(image, 0.0);
                Status::Invalid
            }
        },
        FieldType::Decimal { precision, scale } => match Decimal::parse(trimmed) {
            Ok(d) => store_decimal_value(ft, image, &d),
            Err(DecimalError::Overflow) => {
                let negative = trimmed.starts_with('-');
                Decimal::max_value(*precision, *scale, negative).to_bin(*precision, *scale, image);
                Status::OutOfRange
            }
            Err(_) => {
                Decimal::zero().to_bin(*precision, *scale, image);
                Status::Invalid
            }
        },
        _ => Status::Invalid,
    }
}

pub(super) fn store_int(ft: &FieldType, image: &mut [u8], v: i64) -> Status {
    match ft {
        FieldType::Boolean { .. } => {
            image[0] = u8::from(v != 0);
            Status::Ok
        }
        FieldType::Int32 | FieldType::Int64 => store_clamped(ft, image, v),
        FieldType::Double => {
            encode_f64(image, v as f64);
            Status::Ok
        }
        FieldType::Decimal { .. } => store_decimal_value(ft, image, &Decimal::from_i64(v)),
        _ => Status::Invalid,
    }
}

pub(super) fn store_real(ft: &FieldType, image: &mut [u8], v: f64) -> Status {
    match ft {
        FieldType::Boolean { .. } => {
            image[0] = u8::from(v != 0.0 && !v.is_nan());
            if v.is_nan() {
                Status::Invalid
            } else {
                Status::Ok
            }
        }
        FieldType::Int32 | FieldType::Int64 => {
            if v.is_nan() {
                write_int(ft, image, 0);
                return Status::Invalid;
            }
            let (lo, hi) = int_range(ft);
            let rounded = v.round();
            if rounded < lo as f64 || rounded > hi as f64 {
                write_int(ft, image, if rounded < 0.0 { lo } else { hi });
                return Status::OutOfRange;
            }
            write_int(ft, image, rounded as i64);
            Status::Ok
        }
        FieldType::Double => {
            if v.is_nan() {
                encode_f64(image, 0.0);
                return Status::Invalid;
            }
            encode_f64(image, v);
            Status::Ok
        }
        FieldType::Decimal { precision, scale } => match Decimal::from_f64(v) {
            Ok(d) => store_decimal_value(ft, image, &d),
            Err(_) if v.is_infinite() => {
                Decimal::max_value(*precision, *scale, v < 0.0).to_bin(*precision, *scale, image);
                Status::OutOfRange
            }
            Err(_) => {
                Decimal::zero().to_bin(*precision, *scale, image);
                Status::Invalid
            }
        },
        _ => Status::Invalid,
    }
}

pub(super) fn store_decimal(ft: &FieldType, image: &mut [u8], v: &Decimal) -> Status {
    match ft {
        FieldType::Boolean { .. } => {
            image[0] = u8::from(!v.is_zero());
            Status::Ok
        }
        FieldType::Int32 | FieldType::Int64 => match v.to_i64() {
            Ok(n) => store_clamped(ft, image, n),
            Err(_) => {
                let (lo, hi) = int_range(ft);
                write_int(ft, image, if v.is_negative() { lo } else { hi });
                Status::OutOfRange
            }
        },
        FieldType::Double => {
            encode_f64(image, v.to_f64());
            Status::Ok
        }
        FieldType::Decimal { .. } => store_decimal_value(ft, image, v),
        _ => Status::Invalid,
    }
}

pub(super) fn val_int(ft: &FieldType, image: &[u8]) -> i64 {
    match ft {
        FieldType::Boolean { .. } => i64::from(image[0] != 0),
        FieldType::Int32 => decode_i32(image) as i64,
        FieldType::Int64 => decode_i64(image),
        FieldType::Double => {
            let v = decode_f64(image).round();
            v.clamp(i64::MIN as f64, i64::MAX as f64) as i64
        }
        FieldType::Decimal { .. } => {
            let d = val_decimal(ft, image);
            d.to_i64()
                .unwrap_or(if d.is_negative() { i64::MIN } else { i64::MAX })
        }
        _ => 0,
    }
}

pub(super) fn val_real(ft: &FieldType, image: &[u8]) -> f64 {
    match ft {
        FieldType::Double => decode_f64(image),
        FieldType::Decimal { .. } => val_decimal(ft, image).to_f64(),
        _ => val_int(ft, image) as f64,
    }
}

pub(super) fn val_str(ft: &FieldType, image: &[u8]) -> String {
    match ft {
        FieldType::Boolean { ansi_display } => {
            let set = image[0] != 0;
            match (set, ansi_display) {
                (true, false) => "TRUE",
                (false, false) => "FALSE",
                (true, true) => "YES",
                (false, true) => "NO",
            }
            .to_string()
        }
        FieldType::Double => decode_f64(image).to_string(),
        FieldType::Decimal { .. } => val_decimal(ft, image).to_string(),
        _ => val_int(ft, image).to_string(),
    }
}

pub(super) fn val_decimal(ft: &FieldType, image: &[u8]) -> Decimal {
    match ft {
        FieldType::Decimal { precision, scale } => Decimal::from_bin(image, *precision, *scale),
        FieldType::Double => Decimal::from_f64(decode_f64(image)).unwrap_or_default(),
        _ => Decimal::from_i64(val_int(ft, image)),
    }
}
