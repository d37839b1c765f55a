//! Space-separated uppercase hex pairs (`"47 45 54"`), the byte encoding used
//! by capture files.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid hexdump: {0}")]
pub struct HexLoadError(#[from] hex::FromHexError);

#[must_use]
pub fn hexdump(bytes: &[u8]) -> String {
    let encoded = hex::encode_upper(bytes);
    let mut out = String::with_capacity(bytes.len() * 3);
    for (idx, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.extend(pair.iter().map(|&b| char::from(b)));
    }
    out
}

/// Inverse of [`hexdump`]. Whitespace anywhere in the input is ignored.
pub fn hexload(text: &str) -> Result<Vec<u8>, HexLoadError> {
    let compact: String = text.split_whitespace().collect();
    Ok(hex::decode(compact)?)
}

/// True only for text in exactly the [`hexdump`] layout: uppercase pairs
/// separated by single spaces. Capture files use this to tell a legacy
/// hex-encoded request apart from plain request text.
#[must_use]
pub fn is_hexdump(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() % 3 != 2 {
        return false;
    }
    bytes.iter().enumerate().all(|(idx, &b)| {
        if idx % 3 == 2 {
            b == b' '
        } else {
            b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
        }
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{HexLoadError, hexdump, hexload, is_hexdump};

    #[test]
    fn dumps_known_bytes() {
        assert_eq!(hexdump(b"GET /\r\n"), "47 45 54 20 2F 0D 0A");
        assert_eq!(hexdump(&[]), "");
        assert_eq!(hexdump(&[0xab]), "AB");
    }

    #[test]
    fn loads_lowercase_and_compact_input() {
        assert_eq!(hexload("0d0a").expect("hex"), b"\r\n");
        assert_eq!(hexload("").expect("empty"), Vec::<u8>::new());
    }

    #[test]
    fn rejects_plain_text() {
        assert!(hexload("GET / HTTP/1.1").is_err());
        assert!(hexload("ABC").is_err());
    }

    #[test]
    fn load_errors_compare_by_cause() {
        let odd: HexLoadError = hexload("ABC").expect_err("odd length");
        assert_eq!(odd, HexLoadError::from(hex::FromHexError::OddLength));
        assert_ne!(odd, hexload("ZZ").expect_err("bad digit"));
    }

    #[test]
    fn strict_layout_check() {
        assert!(is_hexdump("47 45 54"));
        assert!(is_hexdump("0D"));
        assert!(!is_hexdump(""));
        assert!(!is_hexdump("CAFE\r\n"));
        assert!(!is_hexdump("CA FE\r\n"));
        assert!(!is_hexdump("ca fe"));
        assert!(!is_hexdump("CA  FE"));
        assert!(!is_hexdump("CA FE "));
        assert!(!is_hexdump("CAFE"));
    }

    proptest! {
        #[test]
        fn hexload_inverts_hexdump(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(hexload(&hexdump(&bytes)).expect("round trip"), bytes);
        }

        #[test]
        fn hexdump_is_uppercase_pairs(bytes in proptest::collection::vec(any::<u8>(), 1..256)) {
            let dumped = hexdump(&bytes);
            let pairs: Vec<&str> = dumped.split(' ').collect();
            prop_assert!(is_hexdump(&dumped));
            prop_assert_eq!(pairs.len(), bytes.len());
            for pair in pairs {
                prop_assert_eq!(pair.len(), 2);
                prop_assert!(pair.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b)));
            }
        }
    }
}
