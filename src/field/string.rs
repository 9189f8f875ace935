//! VARCHAR and CHAR images and their collation order.
//!
//! VARCHAR stores a little-endian length prefix (one byte when the declared
//! length fits in 255, else two) followed by the bytes; unused tail bytes
//! are zero. CHAR is padded with spaces, and trailing spaces are not part
//! of the value.
//!
//! Sort keys:
//!
//! ```text
//! Binary VARCHAR   bytes, zero padded, then 2-byte big-endian length
//! Binary CHAR      bytes, space padded
//! CaseInsensitive  2-byte big-endian folded code points, space padded
//! ```
//!
//! `cmp` and the sort keys agree for values that fit the key budget.

use std::cmp::Ordering;

use super::{Collation, FieldType, Status};
use crate::decimal::Decimal;

const SPACE: u16 = b' ' as u16;

fn declared_length(ft: &FieldType) -> usize {
    match ft {
        FieldType::Varchar { max_length, .. } => *max_length as usize,
        FieldType::Char { length, .. } => *length as usize,
        _ => 0,
    }
}

fn collation_of(ft: &FieldType) -> Collation {
    ft.collation().unwrap_or_default()
}

pub(super) fn stored_len(ft: &FieldType, image: &[u8]) -> usize {
    let len = match ft.length_prefix_bytes() {
        1 => image[0] as usize,
        2 => u16::from_le_bytes([image[0], image[1]]) as usize,
        _ => return declared_length(ft),
    };
    len.min(declared_length(ft))
}

/// The value bytes: VARCHAR without its prefix, CHAR without its padding.
pub(super) fn data<'a>(ft: &FieldType, image: &'a [u8]) -> &'a [u8] {
    match ft {
        FieldType::Varchar { .. } => {
            let prefix = ft.length_prefix_bytes();
            &image[prefix..prefix + stored_len(ft, image)]
        }
        _ => {
            let raw = &image[..declared_length(ft)];
            let end = raw.iter().rposition(|b| *b != b' ').map_or(0, |i| i + 1);
            &raw[..end]
        }
    }
}

/// Longest prefix of `text` that fits in `limit` bytes without splitting a
/// character.
fn fit_prefix(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub(super) fn store_str(ft: &FieldType, image: &mut [u8], text: &str) -> Status {
    let limit = declared_length(ft);
    let kept = fit_prefix(text, limit);
    let status = if text[kept.len()..].bytes().all(|b| b == b' ') {
        Status::Ok
    } else {
        Status::Truncated
    };

    match ft {
        FieldType::Varchar { .. } => {
            let prefix = ft.length_prefix_bytes();
            if prefix == 1 {
                image[0] = kept.len() as u8;
            } else {
                image[..2].copy_from_slice(&(kept.len() as u16).to_le_bytes());
            }
            image[prefix..prefix + kept.len()].copy_from_slice(kept.as_bytes());
            image[prefix + kept.len()..].fill(0);
        }
        _ => {
            image[..kept.len()].copy_from_slice(kept.as_bytes());
            image[kept.len()..limit].fill(b' ');
        }
    }
    status
}

pub(super) fn val_str(ft: &FieldType, image: &[u8]) -> String {
    String::from_utf8_lossy(data(ft, image)).into_owned()
}

pub(super) fn val_int(ft: &FieldType, image: &[u8]) -> i64 {
    let text = val_str(ft, image);
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| Decimal::parse(trimmed).ok().and_then(|d| d.to_i64().ok()))
        .unwrap_or(0)
}

pub(super) fn val_real(ft: &FieldType, image: &[u8]) -> f64 {
    val_str(ft, image).trim().parse::<f64>().unwrap_or(0.0)
}

pub(super) fn val_decimal(ft: &FieldType, image: &[u8]) -> Decimal {
    Decimal::parse(&val_str(ft, image)).unwrap_or_default()
}

fn fold(c: char) -> u16 {
    let mut upper = c.to_uppercase();
    let folded = match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    };
    u16::try_from(folded as u32).unwrap_or(0xFFFD)
}

fn folded_weights(bytes: &[u8]) -> Vec<u16> {
    String::from_utf8_lossy(bytes).chars().map(fold).collect()
}

fn cmp_padded<T: Ord + Copy>(a: &[T], b: &[T], pad: T) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(pad);
        let y = b.get(i).copied().unwrap_or(pad);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub(super) fn cmp(ft: &FieldType, a: &[u8], b: &[u8]) -> Ordering {
    let (da, db) = (data(ft, a), data(ft, b));
    match (collation_of(ft), ft) {
        (Collation::Binary, FieldType::Varchar { .. }) => da.cmp(db),
        (Collation::Binary, _) => cmp_padded(da, db, b' '),
        (Collation::CaseInsensitive, _) => {
            cmp_padded(&folded_weights(da), &folded_weights(db), SPACE)
        }
    }
}

pub(super) fn sort_length(ft: &FieldType, max_sort_length: usize) -> usize {
    let chars = declared_length(ft).min(max_sort_length);
    match (collation_of(ft), ft) {
        (Collation::Binary, FieldType::Varchar { .. }) => chars + 2,
        (Collation::Binary, _) => chars,
        (Collation::CaseInsensitive, _) => chars * 2,
    }
}

pub(super) fn sort_string(ft: &FieldType, image: &[u8], dest: &mut [u8]) {
    let value = data(ft, image);
    match (collation_of(ft), ft) {
        (Collation::Binary, FieldType::Varchar { .. }) => {
            let body = dest.len().saturating_sub(2);
            let n = value.len().min(body);
            dest[..n].copy_from_slice(&value[..n]);
            dest[n..body].fill(0);
            if dest.len() >= 2 {
                let len = (value.len() as u16).to_be_bytes();
                dest[body..body + 2].copy_from_slice(&len);
            }
        }
        (Collation::Binary, _) => {
            let n = value.len().min(dest.len());
            dest[..n].copy_from_slice(&value[..n]);
            dest[n..].fill(b' ');
        }
        (Collation::CaseInsensitive, _) => {
            let weights = folded_weights(value);
            for (i, slot) in dest.chunks_mut(2).enumerate() {
                let w = weights.get(i).copied().unwrap_or(SPACE).to_be_bytes();
                slot.copy_from_slice(&w[..slot.len()]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(ft: FieldType, text: &str) -> Vec<u8> {
        let mut image = vec![0u8; ft.pack_length()];
        store_str(&ft, &mut image, text);
        image
    }

    fn key(ft: FieldType, text: &str) -> Vec<u8> {
        let image = stored(ft, text);
        let mut dest = vec![0u8; sort_length(&ft, 64)];
        sort_string(&ft, &image, &mut dest);
        dest
    }

    #[test]
    fn varchar_stores_prefix_and_truncates_on_char_boundary() {
        let ft = FieldType::varchar(4);
        let mut image = vec![0u8; ft.pack_length()];
        assert_eq!(store_str(&ft, &mut image, "héllo"), Status::Truncated);
        assert_eq!(val_str(&ft, &image), "hél");
        assert_eq!(image[0], 4);

        assert_eq!(store_str(&ft, &mut image, "ab    "), Status::Ok);
        assert_eq!(val_str(&ft, &image), "ab  ");
    }

    #[test]
    fn long_varchar_uses_two_byte_prefix() {
        let ft = FieldType::varchar(1000);
        let text = "x".repeat(700);
        let image = stored(ft, &text);
        assert_eq!(u16::from_le_bytes([image[0], image[1]]), 700);
        assert_eq!(val_str(&ft, &image), text);
    }

    #[test]
    fn char_strips_trailing_spaces() {
        let ft = FieldType::char(6);
        let image = stored(ft, "abc");
        assert_eq!(&image, b"abc   ");
        assert_eq!(val_str(&ft, &image), "abc");
    }

    #[test]
    fn binary_varchar_keeps_trailing_bytes_significant() {
        let ft = FieldType::varchar(8);
        let a = stored(ft, "a");
        let b = stored(ft, "a\0");
        assert_eq!(cmp(&ft, &a, &b), Ordering::Less);
        assert!(key(ft, "a") < key(ft, "a\0"));
        assert!(key(ft, "ab") > key(ft, "a\0"));
    }

    #[test]
    fn case_insensitive_ignores_case_and_trailing_space() {
        let ft = FieldType::varchar(16).with_collation(Collation::CaseInsensitive);
        let a = stored(ft, "Hello");
        let b = stored(ft, "hELLO ");
        assert_eq!(cmp(&ft, &a, &b), Ordering::Equal);
        assert_eq!(key(ft, "Hello"), key(ft, "hELLO "));
        assert!(key(ft, "apple") < key(ft, "Banana"));
        assert_eq!(cmp(&ft, &stored(ft, "apple"), &stored(ft, "Banana")), Ordering::Less);
    }

    #[test]
    fn keys_agree_with_cmp() {
        let ft = FieldType::char(8).with_collation(Collation::Binary);
        let words = ["", "a", "a\x01", "ab", "b", "B"];
        for x in words {
            for y in words {
                let by_cmp = cmp(&ft, &stored(ft, x), &stored(ft, y));
                let by_key = key(ft, x).cmp(&key(ft, y));
                assert_eq!(by_cmp, by_key, "{:?} vs {:?}", x, y);
            }
        }
    }

    #[test]
    fn numeric_reads_of_text() {
        let ft = FieldType::varchar(10);
        assert_eq!(val_int(&ft, &stored(ft, " 42 ")), 42);
        assert_eq!(val_int(&ft, &stored(ft, "2.5")), 3);
        assert_eq!(val_real(&ft, &stored(ft, "abc")), 0.0);
        assert_eq!(val_decimal(&ft, &stored(ft, "1.25")).to_string(), "1.25");
    }
}
