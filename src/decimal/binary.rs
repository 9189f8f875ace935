//! # Decimal Storage Format
//!
//! DECIMAL(p, s) columns store values in a fixed-width, memcmp-ordered
//! binary form. The integer and fraction digits are split into groups of
//! nine, each stored big-endian in four bytes; leading (integer) and
//! trailing (fraction) partial groups use only as many bytes as their digit
//! count needs:
//!
//! ```text
//! digits in group: 0 1 2 3 4 5 6 7 8 9
//! bytes used:      0 1 1 2 2 3 3 4 4 4
//!
//! DECIMAL(14,4) = 1234567890.1234
//!   integer 10 digits  -> [1 digit: 1 byte][9 digits: 4 bytes]
//!   fraction 4 digits  -> [4 digits: 2 bytes]
//!   total 7 bytes
//! ```
//!
//! Negative values invert every byte, and the high bit of the first byte is
//! flipped, so negatives sort below positives and byte order matches
//! numeric order within each sign.

use super::{pow10_u32, Decimal, Limbs};
use crate::config::DECIMAL_DIGITS_PER_LIMB;

const DIG2BYTES: [usize; DECIMAL_DIGITS_PER_LIMB + 1] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

/// Bytes needed to store DECIMAL(precision, scale). A scale above the
/// precision leaves no integer digits.
pub fn bin_size(precision: u8, scale: u8) -> usize {
    let intg = precision.saturating_sub(scale) as usize;
    let frac = scale as usize;
    let full = DECIMAL_DIGITS_PER_LIMB;
    (intg / full) * 4 + DIG2BYTES[intg % full] + (frac / full) * 4 + DIG2BYTES[frac % full]
}

/// Splits a digit string into the storage groups, most significant first.
fn groups(intg: usize, frac: usize) -> Vec<usize> {
    let full = DECIMAL_DIGITS_PER_LIMB;
    let mut out = Vec::new();
    if intg % full > 0 {
        out.push(intg % full);
    }
    out.extend(std::iter::repeat(full).take(intg / full));
    out.extend(std::iter::repeat(full).take(frac / full));
    if frac % full > 0 {
        out.push(frac % full);
    }
    out
}

impl Decimal {
    /// Writes the value as DECIMAL(precision, scale). The value is fitted to
    /// the type first; `out` must hold `bin_size(precision, scale)` bytes.
    pub fn to_bin(&self, precision: u8, scale: u8, out: &mut [u8]) {
        let (value, _) = self.fit(precision, scale);
        let intg = precision.saturating_sub(scale) as usize;
        let frac = scale as usize;
        let total = intg + frac;

        let unscaled = value.unscaled_digits();
        let mut digits = vec![b'0'; total.saturating_sub(unscaled.len())];
        digits.extend_from_slice(unscaled.as_bytes());
        let digits = &digits[digits.len() - total..];

        let mut pos = 0;
        let mut cursor = 0;
        for count in groups(intg, frac) {
            let group = digits[cursor..cursor + count]
                .iter()
                .fold(0u32, |acc, d| acc * 10 + (d - b'0') as u32);
            cursor += count;

            let width = DIG2BYTES[count];
            let be = group.to_be_bytes();
            out[pos..pos + width].copy_from_slice(&be[4 - width..]);
            pos += width;
        }

        if value.is_negative() {
            for byte in &mut out[..pos] {
                *byte = !*byte;
            }
        }
        if pos > 0 {
            out[0] ^= 0x80;
        }
    }

    /// Reads a DECIMAL(precision, scale) image written by `to_bin`.
    pub fn from_bin(bytes: &[u8], precision: u8, scale: u8) -> Decimal {
        let size = bin_size(precision, scale);
        if size == 0 {
            return Decimal::zero();
        }
        let mut buf = bytes[..size].to_vec();
        let negative = buf[0] & 0x80 == 0;
        buf[0] ^= 0x80;
        if negative {
            for byte in &mut buf {
                *byte = !*byte;
            }
        }

        let intg = precision.saturating_sub(scale) as usize;
        let mut mag = Limbs::new();
        let mut pos = 0;
        for count in groups(intg, scale as usize) {
            let width = DIG2BYTES[count];
            let group = buf[pos..pos + width]
                .iter()
                .fold(0u32, |acc, b| (acc << 8) | *b as u32);
            pos += width;

            mag = super::arith::mul_small(&mag, pow10_u32(count));
            super::arith::add_small(&mut mag, group);
        }
        Decimal::from_parts(negative, scale, mag)
    }
}
