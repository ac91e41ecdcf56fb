use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{SoraError, SoraResult};

pub const KEY_ID_SIZE: usize = 16;

/// PlayReady streams carry an 8-byte initialization vector per sample.
pub const INITIALIZATION_VECTOR_SIZE: usize = 8;

/// The corrected 16-byte default key identifier for protected content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionKey(pub [u8; KEY_ID_SIZE]);

/// Decryption context shared read-only by every active track stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionContext {
    pub key_id: ProtectionKey,
    pub iv_size: usize,
}

impl ProtectionContext {
    pub fn new(key_id: ProtectionKey) -> Self {
        Self {
            key_id,
            iv_size: INITIALIZATION_VECTOR_SIZE,
        }
    }
}

/// Recovers the default key identifier embedded in a protection header.
///
/// The header is UTF-16LE XML where only the low bytes carry ASCII content,
/// so every other byte is taken as a character before locating the `<KID>`
/// element. The base64 text inside encodes the GUID with its first three
/// fields little-endian; the byte swaps put them back into big-endian order.
pub fn extract_key_id(data: &[u8]) -> SoraResult<ProtectionKey> {
    let text: String = data.iter().step_by(2).map(|&b| b as char).collect();

    let open = text
        .find("<KID>")
        .ok_or_else(|| SoraError::MalformedProtectionData("missing <KID> element".to_string()))?
        + "<KID>".len();
    let close = text[open..]
        .find("</KID>")
        .map(|offset| open + offset)
        .ok_or_else(|| SoraError::MalformedProtectionData("missing </KID> element".to_string()))?;

    let key_id = STANDARD
        .decode(&text[open..close])
        .map_err(|e| SoraError::MalformedProtectionData(format!("invalid base64 key id: {e}")))?;
    let mut key_id: [u8; KEY_ID_SIZE] = key_id.try_into().map_err(|bytes: Vec<u8>| {
        SoraError::MalformedProtectionData(format!(
            "key id is {} bytes, expected {KEY_ID_SIZE}",
            bytes.len()
        ))
    })?;

    key_id.swap(0, 3);
    key_id.swap(1, 2);
    key_id.swap(4, 5);
    key_id.swap(6, 7);

    Ok(ProtectionKey(key_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a synthetic protection header: XML with the given KID text,
    /// widened to the two-bytes-per-character layout.
    fn protection_header(kid_text: &str) -> Vec<u8> {
        let xml = format!("<WRMHEADER><DATA><KID>{kid_text}</KID></DATA></WRMHEADER>");
        xml.bytes().flat_map(|b| [b, 0u8]).collect()
    }

    #[test]
    fn key_id_round_trip_applies_guid_byte_swaps() {
        let original: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        let payload = protection_header(&STANDARD.encode(original));

        let ProtectionKey(key_id) = extract_key_id(&payload).unwrap();
        let expected: [u8; 16] = [
            0x03, 0x02, 0x01, 0x00, 0x05, 0x04, 0x07, 0x06, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        assert_eq!(key_id, expected);
    }

    #[test]
    fn missing_kid_element_is_malformed() {
        let xml = "<WRMHEADER><DATA></DATA></WRMHEADER>";
        let payload: Vec<u8> = xml.bytes().flat_map(|b| [b, 0u8]).collect();
        assert!(matches!(
            extract_key_id(&payload),
            Err(SoraError::MalformedProtectionData(_))
        ));
    }

    #[test]
    fn missing_closing_tag_is_malformed() {
        let payload: Vec<u8> = "<DATA><KID>AAAA"
            .bytes()
            .flat_map(|b| [b, 0u8])
            .collect();
        assert!(matches!(
            extract_key_id(&payload),
            Err(SoraError::MalformedProtectionData(_))
        ));
    }

    #[test]
    fn wrong_key_length_is_malformed() {
        let payload = protection_header(&STANDARD.encode([0u8; 8]));
        assert!(matches!(
            extract_key_id(&payload),
            Err(SoraError::MalformedProtectionData(_))
        ));
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let payload = protection_header("not base64!!");
        assert!(matches!(
            extract_key_id(&payload),
            Err(SoraError::MalformedProtectionData(_))
        ));
    }

    #[test]
    fn context_carries_default_iv_size() {
        let context = ProtectionContext::new(ProtectionKey([0u8; 16]));
        assert_eq!(context.iv_size, INITIALIZATION_VECTOR_SIZE);
    }
}
