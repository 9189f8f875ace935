//! # Fixed-Point Decimal Engine
//!
//! Exact decimal arithmetic for DECIMAL columns and expressions. A value is a
//! sign, a scale (digits after the point) and the unscaled magnitude stored
//! as little-endian base-10^9 limbs:
//!
//! ```text
//! 12345678901.25  (scale 2)
//!   unscaled = 1234567890125
//!   limbs    = [567890125, 1234]   (least significant first)
//! ```
//!
//! ## Precision Rules
//!
//! - Values carry at most `DECIMAL_MAX_POSSIBLE_PRECISION` (81) digits and a
//!   scale of at most `DECIMAL_MAX_SCALE` (30). Results that would need more
//!   integer digits fail with [`DecimalError::Overflow`]; they never wrap.
//! - Declared column types are limited to `DECIMAL_MAX_PRECISION` (65).
//! - [`Decimal::fit`] adapts a value to a declared `(precision, scale)`:
//!   excess fraction digits are rounded half-up; excess integer digits clamp
//!   to the largest magnitude the type can hold.
//!
//! ## Submodules
//!
//! - `arith`: add, sub, mul, div, rem, neg on the limb representation
//! - `binary`: the memcmp-ordered storage format used by DECIMAL fields
//! - `precision`: static result type computation for operators

mod arith;
mod binary;
mod precision;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;
use thiserror::Error;

use crate::config::{
    DECIMAL_BUFF_LENGTH, DECIMAL_DIGITS_PER_LIMB, DECIMAL_LIMB_BASE, DECIMAL_MAX_POSSIBLE_PRECISION,
    DECIMAL_MAX_SCALE,
};

pub use binary::bin_size;

const EXPONENT_LIMIT: i64 = i32::MAX as i64;
pub use precision::{result_precision, DecimalOp, DecimalSpec};

pub(crate) type Limbs = SmallVec<[u32; DECIMAL_BUFF_LENGTH]>;

const POW10: [u32; 10] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecimalError {
    #[error("bad decimal number")]
    BadNumber,
    #[error("decimal value out of range")]
    Overflow,
    #[error("division by zero")]
    DivideByZero,
}

/// Outcome of adapting a value to a declared precision and scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    Exact,
    /// Fraction digits were rounded away.
    Rounded,
    /// The integer part did not fit; the value was clamped.
    Clamped,
}

#[derive(Clone, Default)]
pub struct Decimal {
    negative: bool,
    scale: u8,
    mag: Limbs,
}

impl Decimal {
    pub fn zero() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(negative: bool, scale: u8, mut mag: Limbs) -> Self {
        trim(&mut mag);
        Self {
            negative: negative && !mag.is_empty(),
            scale,
            mag,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        Self::from_parts(v < 0, 0, limbs_from_u128(v.unsigned_abs() as u128))
    }

    pub fn from_u64(v: u64) -> Self {
        Self::from_parts(false, 0, limbs_from_u128(v as u128))
    }

    /// Converts through the shortest decimal representation of `v`.
    pub fn from_f64(v: f64) -> Result<Self, DecimalError> {
        if !v.is_finite() {
            return Err(DecimalError::BadNumber);
        }
        format!("{}", v).parse()
    }

    /// Builds the largest magnitude representable with `precision` digits,
    /// `scale` of them after the point.
    pub fn max_value(precision: u8, scale: u8, negative: bool) -> Self {
        let mut mag = Limbs::new();
        let mut remaining = precision as usize;
        while remaining >= DECIMAL_DIGITS_PER_LIMB {
            mag.push(DECIMAL_LIMB_BASE - 1);
            remaining -= DECIMAL_DIGITS_PER_LIMB;
        }
        if remaining > 0 {
            mag.push(POW10[remaining] - 1);
        }
        Self::from_parts(negative, scale, mag)
    }

    pub fn is_zero(&self) -> bool {
        self.mag.is_empty()
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Number of significant digits, counting at least the fraction digits
    /// and one integer digit.
    pub fn precision(&self) -> usize {
        digit_count(&self.mag).max(self.scale as usize + 1)
    }

    /// Digits before the point, zero for pure fractions.
    pub fn int_digits(&self) -> usize {
        digit_count(&self.mag).saturating_sub(self.scale as usize)
    }

    pub(crate) fn mag(&self) -> &Limbs {
        &self.mag
    }

    /// Parses `[+-]digits[.digits][e[+-]digits]`, ignoring surrounding
    /// whitespace. More than `DECIMAL_MAX_SCALE` fraction digits are rounded.
    pub fn parse(text: &str) -> Result<Self, DecimalError> {
        let s = text.trim();
        let bytes = s.as_bytes();
        let mut i = 0;

        let negative = match bytes.first() {
            Some(b'-') => {
                i += 1;
                true
            }
            Some(b'+') => {
                i += 1;
                false
            }
            _ => false,
        };

        let int_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let int_part = &s[int_start..i];

        let mut frac_part = "";
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            let frac_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            frac_part = &s[frac_start..i];
        }

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(DecimalError::BadNumber);
        }

        let mut exponent: i64 = 0;
        if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
            exponent = parse_exponent(&s[i + 1..])?;
            i = bytes.len();
        }
        if i != bytes.len() {
            return Err(DecimalError::BadNumber);
        }

        let mut digits: String = format!("{}{}", int_part, frac_part)
            .trim_start_matches('0')
            .to_string();
        let mut scale = frac_part.len() as i64 - exponent;

        if digits.is_empty() {
            let scale = scale.clamp(0, DECIMAL_MAX_SCALE as i64) as u8;
            return Ok(Self::from_parts(false, scale, Limbs::new()));
        }
        if scale < 0 {
            let pad = (-scale) as usize;
            if digits.len().saturating_add(pad) > DECIMAL_MAX_POSSIBLE_PRECISION {
                return Err(DecimalError::Overflow);
            }
            digits.extend(std::iter::repeat('0').take(pad));
            scale = 0;
        }

        if scale > DECIMAL_MAX_SCALE as i64 {
            let excess = (scale - DECIMAL_MAX_SCALE as i64) as usize;
            if excess > digits.len() {
                return Ok(Self::from_parts(false, DECIMAL_MAX_SCALE, Limbs::new()));
            }
            let keep = digits.len() - excess;
            let round_up = digits.as_bytes()[keep] >= b'5';
            let mut mag = limbs_from_digits(&digits[..keep])?;
            if round_up {
                arith::add_small(&mut mag, 1);
            }
            let value = Self::from_parts(negative, DECIMAL_MAX_SCALE, mag);
            if value.int_digits() + DECIMAL_MAX_SCALE as usize > DECIMAL_MAX_POSSIBLE_PRECISION {
                return Err(DecimalError::Overflow);
            }
            return Ok(value);
        }

        let value = Self::from_parts(negative, scale as u8, limbs_from_digits(&digits)?);
        if value.int_digits() + value.scale as usize > DECIMAL_MAX_POSSIBLE_PRECISION {
            return Err(DecimalError::Overflow);
        }
        Ok(value)
    }

    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(0.0)
    }

    /// Rounds half away from zero to an integer.
    pub fn to_i64(&self) -> Result<i64, DecimalError> {
        let rounded = self.round(0);
        let magnitude = limbs_to_u128(&rounded.mag).ok_or(DecimalError::Overflow)?;
        if rounded.negative {
            if magnitude > i64::MIN.unsigned_abs() as u128 {
                return Err(DecimalError::Overflow);
            }
            Ok((magnitude as i128).wrapping_neg() as i64)
        } else {
            i64::try_from(magnitude).map_err(|_| DecimalError::Overflow)
        }
    }

    /// Changes the scale, rounding half-up when digits are dropped.
    pub fn round(&self, scale: u8) -> Self {
        match scale.cmp(&self.scale) {
            Ordering::Equal => self.clone(),
            Ordering::Greater => self.rescaled(scale),
            Ordering::Less => {
                let drop = (self.scale - scale) as usize;
                let mag = arith::shift_right_rounded(&self.mag, drop);
                Self::from_parts(self.negative, scale, mag)
            }
        }
    }

    /// Changes the scale, discarding dropped digits.
    pub fn truncate(&self, scale: u8) -> Self {
        if scale >= self.scale {
            return self.rescaled(scale);
        }
        let drop = (self.scale - scale) as usize;
        let (quotient, _) = arith::divmod_mag(&self.mag, &pow10_limbs(drop));
        Self::from_parts(self.negative, scale, quotient)
    }

    /// Exact change to a larger scale.
    pub(crate) fn rescaled(&self, scale: u8) -> Self {
        debug_assert!(scale >= self.scale);
        let mag = arith::mul_pow10(&self.mag, (scale - self.scale) as usize);
        Self::from_parts(self.negative, scale, mag)
    }

    /// Adapts the value to a declared column type.
    pub fn fit(&self, precision: u8, scale: u8) -> (Self, Fit) {
        let rounded = self.round(scale);
        let mut fit = if rounded.cmp(self) == Ordering::Equal {
            Fit::Exact
        } else {
            Fit::Rounded
        };

        let allowed_int = precision.saturating_sub(scale) as usize;
        if rounded.int_digits() > allowed_int {
            fit = Fit::Clamped;
            return (Self::max_value(precision, scale, self.negative), fit);
        }
        (rounded, fit)
    }

    pub(crate) fn set_negative(&mut self, negative: bool) {
        self.negative = negative && !self.mag.is_empty();
    }

    fn unscaled_digits(&self) -> String {
        let mut out = String::new();
        let mut iter = self.mag.iter().rev();
        match iter.next() {
            Some(top) => out.push_str(&top.to_string()),
            None => out.push('0'),
        }
        for limb in iter {
            out.push_str(&format!("{:09}", limb));
        }
        out
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut digits = self.unscaled_digits();
        let scale = self.scale as usize;
        if scale > 0 {
            if digits.len() <= scale {
                let pad = scale + 1 - digits.len();
                digits.insert_str(0, &"0".repeat(pad));
            }
            digits.insert(digits.len() - scale, '.');
        }
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&digits)
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({})", self)
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Self::from_i64(v)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => return Ordering::Greater,
            (true, false) => return Ordering::Less,
            _ => {}
        }
        let scale = self.scale.max(other.scale);
        let a = arith::mul_pow10(&self.mag, (scale - self.scale) as usize);
        let b = arith::mul_pow10(&other.mag, (scale - other.scale) as usize);
        let ord = arith::cmp_mag(&a, &b);
        if self.negative {
            ord.reverse()
        } else {
            ord
        }
    }
}

pub(crate) fn trim(mag: &mut Limbs) {
    while mag.last() == Some(&0) {
        mag.pop();
    }
}

pub(crate) fn digit_count(mag: &Limbs) -> usize {
    match mag.last() {
        None => 0,
        Some(top) => {
            let top_digits = POW10.iter().take_while(|p| **p <= *top).count();
            (mag.len() - 1) * DECIMAL_DIGITS_PER_LIMB + top_digits
        }
    }
}

pub(crate) fn pow10_limbs(exp: usize) -> Limbs {
    let mut one = Limbs::new();
    one.push(1);
    arith::mul_pow10(&one, exp)
}

pub(crate) fn pow10_u32(exp: usize) -> u32 {
    POW10[exp]
}

fn limbs_from_u128(mut v: u128) -> Limbs {
    let mut mag = Limbs::new();
    while v > 0 {
        mag.push((v % DECIMAL_LIMB_BASE as u128) as u32);
        v /= DECIMAL_LIMB_BASE as u128;
    }
    mag
}

fn limbs_to_u128(mag: &Limbs) -> Option<u128> {
    let mut v: u128 = 0;
    for limb in mag.iter().rev() {
        v = v
            .checked_mul(DECIMAL_LIMB_BASE as u128)?
            .checked_add(*limb as u128)?;
    }
    Some(v)
}

/// Exponent magnitudes saturate at `EXPONENT_LIMIT`; anything that large
/// already overflows or rounds to zero.
fn parse_exponent(text: &str) -> Result<i64, DecimalError> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecimalError::BadNumber);
    }
    let magnitude = digits.bytes().fold(0i64, |acc, b| {
        (acc * 10 + (b - b'0') as i64).min(EXPONENT_LIMIT)
    });
    Ok(if negative { -magnitude } else { magnitude })
}

fn limbs_from_digits(digits: &str) -> Result<Limbs, DecimalError> {
    if digits.len() > DECIMAL_MAX_POSSIBLE_PRECISION + DECIMAL_MAX_SCALE as usize {
        return Err(DecimalError::Overflow);
    }
    let mut mag = Limbs::new();
    let bytes = digits.as_bytes();
    let mut end = bytes.len();
    while end > 0 {
        let start = end.saturating_sub(DECIMAL_DIGITS_PER_LIMB);
        let limb = bytes[start..end]
            .iter()
            .fold(0u32, |acc, b| acc * 10 + (b - b'0') as u32);
        mag.push(limb);
        end = start;
    }
    trim(&mut mag);
    Ok(mag)
}
