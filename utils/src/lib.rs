//! Leverage common functionality across the consensus core.

use bytes::BufMut;
use epochal_codec::varint;

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Converts a hexadecimal string to bytes.
pub fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Concatenate a namespace and a message, prepended by a varint encoding of the namespace length.
///
/// This produces a unique byte sequence (i.e. no collisions) for each `(namespace, msg)` pair.
pub fn union_unique(namespace: &[u8], msg: &[u8]) -> Vec<u8> {
    let len = u32::try_from(namespace.len()).expect("namespace length exceeds u32");
    let mut result = Vec::with_capacity(varint::size(len) + namespace.len() + msg.len());
    varint::write(len, &mut result);
    result.put_slice(namespace);
    result.put_slice(msg);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        // Empty bytes
        let h = hex(&[]);
        assert_eq!(h, "");
        assert_eq!(from_hex(&h).unwrap(), Vec::<u8>::new());

        // Multiple bytes
        let b = &[0x01, 0x02, 0xab];
        let h = hex(b);
        assert_eq!(h, "0102ab");
        assert_eq!(from_hex(&h).unwrap(), b.to_vec());

        // Odd length
        assert!(from_hex("0102030").is_none());

        // Invalid character
        assert!(from_hex("01g3").is_none());

        // Multi-byte character never splits silently
        assert!(from_hex("0é0").is_none());
    }

    #[test]
    fn test_union_unique() {
        let namespace = b"namespace";
        let msg = b"message";

        let union = union_unique(namespace, msg);
        assert_eq!(union[0], namespace.len() as u8);
        assert_eq!(&union[1..namespace.len() + 1], namespace);
        assert_eq!(&union[namespace.len() + 1..], msg);

        // Shifting bytes between namespace and message changes the result
        assert_ne!(union_unique(b"name", b"spacemessage"), union);
    }
}
