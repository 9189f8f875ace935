//! # Decimal Arithmetic Integration Tests
//!
//! Multi-step calculations through the public decimal API, checked against
//! the declared result types the planner would compute for them.

use querycore::decimal::{
    bin_size, result_precision, DecimalError, DecimalOp, DecimalSpec, Fit,
};
use querycore::Decimal;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

// ============================================================================
// Arithmetic chains
// ============================================================================

#[test]
fn invoice_total_rounds_once_at_the_end() {
    let lines = [("19.99", "3"), ("0.125", "8"), ("1250.00", "0.075")];
    let mut total = Decimal::zero();
    for (price, qty) in lines {
        total = total.add(&dec(price).mul(&dec(qty)).unwrap()).unwrap();
    }
    assert_eq!(total.to_string(), "154.72000");

    let (stored, fit) = total.fit(10, 2);
    assert_eq!(stored.to_string(), "154.72");
    assert_eq!(fit, Fit::Exact);
    assert_eq!(stored, total);

    let (stored, fit) = dec("154.725").fit(10, 2);
    assert_eq!(stored.to_string(), "154.73");
    assert_eq!(fit, Fit::Rounded);
}

#[test]
fn division_scale_follows_increment() {
    assert_eq!(dec("1").div(&dec("3"), 4).unwrap().to_string(), "0.3333");
    assert_eq!(dec("2.50").div(&dec("0.5"), 4).unwrap().to_string(), "5.00000");
    assert_eq!(dec("-1").div(&dec("7"), 0).unwrap().to_string(), "0");
    assert_eq!(
        dec("1").div(&dec("3"), 40).unwrap().scale(),
        30,
        "scale is capped"
    );
    assert_eq!(dec("1").div(&dec("0"), 4), Err(DecimalError::DivideByZero));
}

#[test]
fn average_of_a_column() {
    let values = ["10.10", "20.20", "30.31"];
    let sum = values
        .iter()
        .try_fold(Decimal::zero(), |acc, v| acc.add(&dec(v)))
        .unwrap();
    let avg = sum.div(&Decimal::from_i64(values.len() as i64), 4).unwrap();
    assert_eq!(sum.to_string(), "60.61");
    assert_eq!(avg.to_string(), "20.203333");
    assert_eq!(avg.round(2).to_string(), "20.20");
    assert_eq!(avg.truncate(3).to_string(), "20.203");
}

#[test]
fn result_types_hold_the_computed_values() {
    let price = DecimalSpec::new(10, 2);
    let rate = DecimalSpec::new(5, 4);

    let product = result_precision(DecimalOp::Mul, price, rate, 4);
    assert_eq!((product.precision, product.scale), (15, 6));
    let v = dec("99999999.99").mul(&dec("9.9999")).unwrap();
    assert_eq!(v.fit(product.precision, product.scale).1, Fit::Exact);

    let sum = result_precision(DecimalOp::Add, price, rate, 4);
    assert_eq!((sum.precision, sum.scale), (13, 4));
    let v = dec("99999999.99").add(&dec("9.9999")).unwrap();
    assert_eq!(v.fit(sum.precision, sum.scale).1, Fit::Exact);

    let quotient = result_precision(DecimalOp::Div, price, rate, 4);
    assert_eq!(quotient.scale, 4);
    let v = dec("1.00").div(&dec("0.0003"), 4).unwrap();
    assert_eq!(v.scale(), quotient.scale);
    assert_eq!(v.fit(quotient.precision, quotient.scale).1, Fit::Exact);
}

#[test]
fn clamps_to_the_declared_range() {
    let (v, fit) = dec("123456.789").fit(6, 2);
    assert_eq!((v.to_string(), fit), ("9999.99".to_string(), Fit::Clamped));
    let (v, fit) = dec("-123456.789").fit(6, 2);
    assert_eq!((v.to_string(), fit), ("-9999.99".to_string(), Fit::Clamped));
}

// ============================================================================
// Binary form
// ============================================================================

#[test]
fn binary_images_sort_like_values() {
    let (p, s) = (20u8, 6u8);
    let mut values: Vec<Decimal> = [
        "-99999999999999.999999",
        "-123.456",
        "-1",
        "-0.000001",
        "0",
        "0.000001",
        "1",
        "123.456",
        "12345678901234.5",
        "99999999999999.999999",
    ]
    .iter()
    .map(|v| dec(v))
    .collect();
    values.reverse();

    let mut images: Vec<Vec<u8>> = values
        .iter()
        .map(|v| {
            let mut out = vec![0u8; bin_size(p, s)];
            v.to_bin(p, s, &mut out);
            out
        })
        .collect();
    images.sort();
    values.sort();

    let decoded: Vec<Decimal> = images.iter().map(|b| Decimal::from_bin(b, p, s)).collect();
    assert_eq!(decoded, values);
}

// ============================================================================
// Extreme input
// ============================================================================

#[test]
fn extreme_exponents_overflow_or_vanish() {
    for text in ["1e9223372036854775807", "-1e99999999999999999999", "9.9E+100"] {
        assert_eq!(Decimal::parse(text), Err(DecimalError::Overflow), "{}", text);
    }
    for text in ["1e-9223372036854775808", "-5e-99999999999999999999", "1E-200"] {
        let value = Decimal::parse(text).unwrap();
        assert!(value.is_zero(), "{}", text);
        assert_eq!(value.fit(10, 2), (Decimal::zero(), Fit::Exact));
    }
    assert_eq!(dec("1e80").to_string(), format!("1{}", "0".repeat(80)));
}

#[test]
fn scale_above_precision_sizes_without_integer_digits() {
    assert_eq!(bin_size(3, 7), bin_size(7, 7));
    let mut out = vec![0u8; bin_size(3, 7)];
    dec("0.0000123").to_bin(3, 7, &mut out);
    assert_eq!(Decimal::from_bin(&out, 3, 7).to_string(), "0.0000123");
}
