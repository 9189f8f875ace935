//! Limb arithmetic and the SQL operators built on it.
//!
//! Magnitudes are little-endian base-10^9 limbs with no high zero limbs.
//! Division uses schoolbook long division with a binary search for each
//! quotient limb; operands never exceed a dozen limbs, so the search costs
//! nothing measurable next to per-row expression overhead.

use std::cmp::Ordering;

use super::{
    digit_count, pow10_limbs, pow10_u32, trim, Decimal, DecimalError, Limbs,
};
use crate::config::{
    DECIMAL_DIGITS_PER_LIMB, DECIMAL_LIMB_BASE, DECIMAL_MAX_POSSIBLE_PRECISION, DECIMAL_MAX_SCALE,
};

const BASE: u64 = DECIMAL_LIMB_BASE as u64;

pub(crate) fn cmp_mag(a: &Limbs, b: &Limbs) -> Ordering {
    if a.len() != b.len() {
        return a.len().cmp(&b.len());
    }
    for (x, y) in a.iter().rev().zip(b.iter().rev()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}

fn add_mag(a: &Limbs, b: &Limbs) -> Limbs {
    let mut out = Limbs::with_capacity(a.len().max(b.len()) + 1);
    let mut carry = 0u64;
    for i in 0..a.len().max(b.len()) {
        let sum = *a.get(i).unwrap_or(&0) as u64 + *b.get(i).unwrap_or(&0) as u64 + carry;
        out.push((sum % BASE) as u32);
        carry = sum / BASE;
    }
    if carry > 0 {
        out.push(carry as u32);
    }
    out
}

/// `a - b`, requires `a >= b`.
fn sub_mag(a: &Limbs, b: &Limbs) -> Limbs {
    let mut out = Limbs::with_capacity(a.len());
    let mut borrow = 0i64;
    for i in 0..a.len() {
        let mut diff = a[i] as i64 - *b.get(i).unwrap_or(&0) as i64 - borrow;
        if diff < 0 {
            diff += BASE as i64;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out.push(diff as u32);
    }
    trim(&mut out);
    out
}

pub(crate) fn add_small(a: &mut Limbs, v: u32) {
    let mut carry = v as u64;
    for limb in a.iter_mut() {
        if carry == 0 {
            return;
        }
        let sum = *limb as u64 + carry;
        *limb = (sum % BASE) as u32;
        carry = sum / BASE;
    }
    if carry > 0 {
        a.push(carry as u32);
    }
}

pub(crate) fn mul_small(a: &Limbs, m: u32) -> Limbs {
    if m == 0 || a.is_empty() {
        return Limbs::new();
    }
    let mut out = Limbs::with_capacity(a.len() + 1);
    let mut carry = 0u64;
    for limb in a {
        let prod = *limb as u64 * m as u64 + carry;
        out.push((prod % BASE) as u32);
        carry = prod / BASE;
    }
    if carry > 0 {
        out.push(carry as u32);
    }
    out
}

fn mul_mag(a: &Limbs, b: &Limbs) -> Limbs {
    if a.is_empty() || b.is_empty() {
        return Limbs::new();
    }
    let mut acc = vec![0u64; a.len() + b.len()];
    for (i, x) in a.iter().enumerate() {
        let mut carry = 0u64;
        for (j, y) in b.iter().enumerate() {
            let cur = acc[i + j] + *x as u64 * *y as u64 + carry;
            acc[i + j] = cur % BASE;
            carry = cur / BASE;
        }
        let mut k = i + b.len();
        while carry > 0 {
            let cur = acc[k] + carry;
            acc[k] = cur % BASE;
            carry = cur / BASE;
            k += 1;
        }
    }
    let mut out: Limbs = acc.into_iter().map(|v| v as u32).collect();
    trim(&mut out);
    out
}

pub(crate) fn mul_pow10(a: &Limbs, mut exp: usize) -> Limbs {
    let mut out = a.clone();
    while exp > 0 && !out.is_empty() {
        let step = exp.min(DECIMAL_DIGITS_PER_LIMB);
        out = mul_small(&out, pow10_u32(step));
        exp -= step;
    }
    out
}

fn divmod_small(a: &Limbs, d: u32) -> (Limbs, u32) {
    let mut quotient = Limbs::from_elem(0, a.len());
    let mut rem = 0u64;
    for i in (0..a.len()).rev() {
        let cur = rem * BASE + a[i] as u64;
        quotient[i] = (cur / d as u64) as u32;
        rem = cur % d as u64;
    }
    trim(&mut quotient);
    (quotient, rem as u32)
}

/// Truncating division of magnitudes, `b` must be non-zero.
pub(crate) fn divmod_mag(a: &Limbs, b: &Limbs) -> (Limbs, Limbs) {
    debug_assert!(!b.is_empty());
    if cmp_mag(a, b) == Ordering::Less {
        return (Limbs::new(), a.clone());
    }
    if b.len() == 1 {
        let (q, r) = divmod_small(a, b[0]);
        let mut rem = Limbs::new();
        if r > 0 {
            rem.push(r);
        }
        return (q, rem);
    }

    let mut quotient = Limbs::from_elem(0, a.len());
    let mut rem = Limbs::new();
    for i in (0..a.len()).rev() {
        rem.insert(0, a[i]);
        trim(&mut rem);

        let (mut lo, mut hi) = (0u32, DECIMAL_LIMB_BASE - 1);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if cmp_mag(&mul_small(b, mid), &rem) != Ordering::Greater {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        if lo > 0 {
            rem = sub_mag(&rem, &mul_small(b, lo));
        }
        quotient[i] = lo;
    }
    trim(&mut quotient);
    (quotient, rem)
}

/// Divides by `10^digits`, rounding half-up on the dropped digits.
pub(crate) fn shift_right_rounded(a: &Limbs, digits: usize) -> Limbs {
    let divisor = pow10_limbs(digits);
    let (mut quotient, rem) = divmod_mag(a, &divisor);
    if cmp_mag(&mul_small(&rem, 2), &divisor) != Ordering::Less {
        add_small(&mut quotient, 1);
    }
    quotient
}

fn check_size(value: Decimal) -> Result<Decimal, DecimalError> {
    if digit_count(value.mag()).max(value.scale() as usize) > DECIMAL_MAX_POSSIBLE_PRECISION {
        return Err(DecimalError::Overflow);
    }
    Ok(value)
}

fn aligned(a: &Decimal, b: &Decimal) -> (Limbs, Limbs, u8) {
    let scale = a.scale().max(b.scale());
    (
        mul_pow10(a.mag(), (scale - a.scale()) as usize),
        mul_pow10(b.mag(), (scale - b.scale()) as usize),
        scale,
    )
}

impl Decimal {
    pub fn add(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        let (a, b, scale) = aligned(self, other);
        let result = if self.is_negative() == other.is_negative() {
            Decimal::from_parts(self.is_negative(), scale, add_mag(&a, &b))
        } else {
            match cmp_mag(&a, &b) {
                Ordering::Less => Decimal::from_parts(other.is_negative(), scale, sub_mag(&b, &a)),
                _ => Decimal::from_parts(self.is_negative(), scale, sub_mag(&a, &b)),
            }
        };
        check_size(result)
    }

    pub fn sub(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        self.add(&other.neg())
    }

    /// Product scale is the sum of the operand scales, truncated to
    /// `DECIMAL_MAX_SCALE`.
    pub fn mul(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        let scale = self.scale() as usize + other.scale() as usize;
        let mag = mul_mag(self.mag(), other.mag());
        let negative = self.is_negative() != other.is_negative();
        let result = Decimal::from_parts(negative, scale.min(u8::MAX as usize) as u8, mag);
        if scale > DECIMAL_MAX_SCALE as usize {
            return check_size(result.truncate(DECIMAL_MAX_SCALE));
        }
        check_size(result)
    }

    /// Truncating division. The result scale is the dividend's scale in
    /// excess of the divisor's plus `precision_increment`, capped at
    /// `DECIMAL_MAX_SCALE`.
    pub fn div(&self, other: &Decimal, precision_increment: u8) -> Result<Decimal, DecimalError> {
        if other.is_zero() {
            return Err(DecimalError::DivideByZero);
        }
        let scale = div_scale(self.scale(), other.scale(), precision_increment);

        // q = A * 10^(scale + sb - sa) / B
        let exp = scale as i32 + other.scale() as i32 - self.scale() as i32;
        let (numerator, denominator) = if exp >= 0 {
            (mul_pow10(self.mag(), exp as usize), other.mag().clone())
        } else {
            (self.mag().clone(), mul_pow10(other.mag(), (-exp) as usize))
        };
        let (quotient, _) = divmod_mag(&numerator, &denominator);
        let negative = self.is_negative() != other.is_negative();
        check_size(Decimal::from_parts(negative, scale, quotient))
    }

    /// Truncating remainder; the sign follows the dividend.
    pub fn rem(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        if other.is_zero() {
            return Err(DecimalError::DivideByZero);
        }
        let (a, b, scale) = aligned(self, other);
        let (_, remainder) = divmod_mag(&a, &b);
        check_size(Decimal::from_parts(self.is_negative(), scale, remainder))
    }

    pub fn neg(&self) -> Decimal {
        let mut out = self.clone();
        out.set_negative(!self.is_negative());
        out
    }

    pub fn abs(&self) -> Decimal {
        let mut out = self.clone();
        out.set_negative(false);
        out
    }
}

pub(crate) fn div_scale(dividend_scale: u8, divisor_scale: u8, precision_increment: u8) -> u8 {
    let base = dividend_scale.saturating_sub(divisor_scale) as usize;
    (base + precision_increment as usize).min(DECIMAL_MAX_SCALE as usize) as u8
}
