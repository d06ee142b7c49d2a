//! Binary payload codec.
//!
//! Terminal bytes travel inside JSON packets as hex strings: two characters
//! per byte, lowercase on output, case-insensitive on input.

use crate::error::Result;

/// Encodes raw terminal bytes as a lowercase hex string.
pub fn encode_payload(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hex string into raw terminal bytes.
///
/// Returns [`ProtocolError::DataInvalid`](crate::ProtocolError::DataInvalid)
/// for odd-length input or non-hex characters.
pub fn decode_payload(text: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn test_encode_lowercase() {
        assert_eq!(encode_payload(b"ls\n"), "6c730a");
        assert_eq!(encode_payload(&[0x00, 0xff, 0xab]), "00ffab");
        assert_eq!(encode_payload(&[]), "");
    }

    #[test]
    fn test_decode_case_insensitive() {
        assert_eq!(decode_payload("6c730a").unwrap(), b"ls\n");
        assert_eq!(decode_payload("00FFab").unwrap(), vec![0x00, 0xff, 0xab]);
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode_payload(&encode_payload(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            decode_payload("abc"),
            Err(ProtocolError::DataInvalid(_))
        ));
        assert!(matches!(
            decode_payload("zz"),
            Err(ProtocolError::DataInvalid(_))
        ));
        assert!(matches!(
            decode_payload("6c 73"),
            Err(ProtocolError::DataInvalid(_))
        ));
    }
}
