//! Result types for decimal operators.
//!
//! The planner needs the declared `(precision, scale)` of an expression
//! before any value exists, so the rules here mirror what the arithmetic in
//! `arith` produces for operands of the given types.

use super::arith::div_scale;
use crate::config::{DECIMAL_MAX_PRECISION, DECIMAL_MAX_SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
}

/// Declared DECIMAL(precision, scale).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalSpec {
    pub precision: u8,
    pub scale: u8,
}

impl DecimalSpec {
    pub fn new(precision: u8, scale: u8) -> Self {
        let precision = precision.min(DECIMAL_MAX_PRECISION);
        Self {
            precision,
            scale: scale.min(DECIMAL_MAX_SCALE).min(precision),
        }
    }

    pub fn int_digits(&self) -> u8 {
        self.precision - self.scale
    }
}

/// Computes the result type of `lhs op rhs`. `rhs` is ignored for `Neg`.
pub fn result_precision(
    op: DecimalOp,
    lhs: DecimalSpec,
    rhs: DecimalSpec,
    precision_increment: u8,
) -> DecimalSpec {
    let (int_digits, scale) = match op {
        DecimalOp::Neg => (lhs.int_digits() as usize, lhs.scale),
        DecimalOp::Add | DecimalOp::Sub => {
            let scale = lhs.scale.max(rhs.scale);
            let int_digits = lhs.int_digits().max(rhs.int_digits()) as usize + 1;
            (int_digits, scale)
        }
        DecimalOp::Mul => {
            let scale = (lhs.scale as usize + rhs.scale as usize).min(DECIMAL_MAX_SCALE as usize);
            let int_digits = lhs.int_digits() as usize + rhs.int_digits() as usize;
            (int_digits, scale as u8)
        }
        DecimalOp::Div => {
            let scale = div_scale(lhs.scale, rhs.scale, precision_increment);
            let int_digits = lhs.int_digits() as usize + rhs.scale as usize;
            (int_digits, scale)
        }
        DecimalOp::Mod => {
            let scale = lhs.scale.max(rhs.scale);
            let int_digits = lhs.int_digits().max(rhs.int_digits()) as usize;
            (int_digits, scale)
        }
    };

    let precision = (int_digits + scale as usize)
        .max(1)
        .min(DECIMAL_MAX_PRECISION as usize) as u8;
    DecimalSpec {
        precision,
        scale: scale.min(precision),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal;

    fn spec(p: u8, s: u8) -> DecimalSpec {
        DecimalSpec::new(p, s)
    }

    #[test]
    fn add_grows_integer_part_by_one() {
        let r = result_precision(DecimalOp::Add, spec(5, 2), spec(7, 4), 4);
        assert_eq!(r, spec(8, 4));
    }

    #[test]
    fn mul_sums_precision_and_scale() {
        let r = result_precision(DecimalOp::Mul, spec(5, 2), spec(4, 1), 4);
        assert_eq!(r, spec(9, 3));
    }

    #[test]
    fn div_scale_matches_arithmetic() {
        let lhs: Decimal = "10.00".parse().unwrap();
        let rhs: Decimal = "3.00".parse().unwrap();
        let q = lhs.div(&rhs, 4).unwrap();

        let r = result_precision(DecimalOp::Div, spec(4, 2), spec(3, 2), 4);
        assert_eq!(r.scale, q.scale());
        assert!(q.int_digits() <= r.int_digits() as usize);
    }

    #[test]
    fn mod_keeps_widest_operand() {
        let r = result_precision(DecimalOp::Mod, spec(6, 2), spec(4, 3), 4);
        assert_eq!(r, spec(7, 3));
    }

    #[test]
    fn precision_is_capped() {
        let r = result_precision(DecimalOp::Mul, spec(60, 20), spec(60, 20), 4);
        assert_eq!(r.precision, DECIMAL_MAX_PRECISION);
        assert_eq!(r.scale, 30);
    }

    #[test]
    fn neg_preserves_type() {
        let r = result_precision(DecimalOp::Neg, spec(9, 3), spec(1, 0), 4);
        assert_eq!(r, spec(9, 3));
    }
}
