//! IPv6 and UUID images.
//!
//! Both are 16 bytes in network order, so `memcmp` orders them the same way
//! as their canonical text. Text that fails to parse leaves the image
//! untouched.

use std::net::Ipv6Addr;

use super::{FieldType, Status};

pub(super) fn store_str(ft: &FieldType, image: &mut [u8], text: &str) -> Status {
    let parsed = match ft {
        FieldType::Ipv6 => text.trim().parse::<Ipv6Addr>().ok().map(|a| a.octets()),
        FieldType::Uuid => parse_uuid(text),
        _ => None,
    };
    match parsed {
        Some(bytes) => {
            image[..16].copy_from_slice(&bytes);
            Status::Ok
        }
        None => Status::Invalid,
    }
}

/// Accepts the hyphenated 8-4-4-4-12 form or 32 bare hex digits.
fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let s = text.trim();
    let hex: Vec<u8> = match s.len() {
        36 => {
            let bytes = s.as_bytes();
            if [8, 13, 18, 23].iter().any(|i| bytes[*i] != b'-') {
                return None;
            }
            bytes.iter().copied().filter(|b| *b != b'-').collect()
        }
        32 => s.as_bytes().to_vec(),
        _ => return None,
    };
    if hex.len() != 32 {
        return None;
    }

    let mut out = [0u8; 16];
    for (i, pair) in hex.chunks(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out[i] = (hi * 16 + lo) as u8;
    }
    Some(out)
}

pub(super) fn val_str(ft: &FieldType, image: &[u8]) -> String {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&image[..16]);
    match ft {
        FieldType::Ipv6 => Ipv6Addr::from(octets).to_string(),
        _ => {
            let hex: String = octets.iter().map(|b| format!("{:02x}", b)).collect();
            format!(
                "{}-{}-{}-{}-{}",
                &hex[0..8],
                &hex[8..12],
                &hex[12..16],
                &hex[16..20],
                &hex[20..32]
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_round_trips_in_canonical_form() {
        let mut image = [0u8; 16];
        for (input, canonical) in [
            ("2001:db8::1", "2001:db8::1"),
            ("2001:0DB8:0000:0000:0000:0000:0000:0001", "2001:db8::1"),
            ("::", "::"),
            ("::ffff:192.0.2.1", "::ffff:192.0.2.1"),
            ("fe80::1:2:3:4", "fe80::1:2:3:4"),
        ] {
            assert_eq!(store_str(&FieldType::Ipv6, &mut image, input), Status::Ok);
            assert_eq!(val_str(&FieldType::Ipv6, &image), canonical);
        }
    }

    #[test]
    fn invalid_ipv6_leaves_image_untouched() {
        let mut image = [0xAAu8; 16];
        assert_eq!(store_str(&FieldType::Ipv6, &mut image, "2001:db8:::1"), Status::Invalid);
        assert_eq!(store_str(&FieldType::Ipv6, &mut image, "10.0.0.1"), Status::Invalid);
        assert_eq!(image, [0xAAu8; 16]);
    }

    #[test]
    fn uuid_forms() {
        let mut image = [0u8; 16];
        let text = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(store_str(&FieldType::Uuid, &mut image, text), Status::Ok);
        assert_eq!(val_str(&FieldType::Uuid, &image), text);

        let mut compact = [0u8; 16];
        assert_eq!(
            store_str(&FieldType::Uuid, &mut compact, "550E8400E29B41D4A716446655440000"),
            Status::Ok
        );
        assert_eq!(compact, image);
    }

    #[test]
    fn malformed_uuid_is_rejected_without_writing() {
        let mut image = [7u8; 16];
        for bad in [
            "550e8400-e29b-41d4-a716-44665544000",
            "550e8400e29b-41d4-a716-4466554400000",
            "zz0e8400-e29b-41d4-a716-446655440000",
        ] {
            assert_eq!(store_str(&FieldType::Uuid, &mut image, bad), Status::Invalid);
        }
        assert_eq!(image, [7u8; 16]);
    }
}
